//! Shared helpers for the command line tool: logger setup and input/output path handling.
use std::error::Error;
use std::path::{Path, PathBuf};

/// Route `log` output to stderr, or append it to `log_file`, at `log_level` (off, error, warn, info,
/// debug, trace). An unknown level falls back to info.
pub fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    let level = log_level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Unknown log level '{}', using info", log_level);
        log::LevelFilter::Info
    });
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level).format(|buf, record| {
        use std::io::Write;
        writeln!(
            buf,
            "{} {:<5} {}: {}",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    });
    if let Some(path) = log_file {
        builder.target(env_logger::Target::Pipe(Box::new(open_log_file(path)?)));
    }
    builder.try_init()?;
    Ok(())
}

fn open_log_file(path: &Path) -> std::io::Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::OpenOptions::new().create(true).append(true).open(path)
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"))
}

/// Sensor logs to replay: `input` itself when it is a CSV file, or the CSV files directly inside it
/// (sorted by path).
pub fn get_csv_files(input: &Path) -> Result<Vec<PathBuf>, Box<dyn Error>> {
    if input.is_file() {
        return if is_csv(input) {
            Ok(vec![input.to_path_buf()])
        } else {
            Err(format!("{} is not a CSV sensor log", input.display()).into())
        };
    }
    if !input.is_dir() {
        return Err(format!("{} not found", input.display()).into());
    }
    let mut logs = Vec::new();
    for entry in std::fs::read_dir(input)? {
        let path = entry?.path();
        if path.is_file() && is_csv(&path) {
            logs.push(path);
        }
    }
    if logs.is_empty() {
        return Err(format!("no sensor logs (*.csv) in {}", input.display()).into());
    }
    logs.sort();
    Ok(logs)
}

/// Where the replay of `input` is written when the output is a directory.
pub fn output_file_for(input: &Path, output_dir: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("replay");
    output_dir.join(format!("{}_nav.csv", stem))
}

/// Create the output directory if it does not exist yet.
pub fn ensure_output_dir(output: &Path) -> Result<(), Box<dyn Error>> {
    if !output.exists() {
        std::fs::create_dir_all(output)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn single_csv_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("walk.csv");
        std::fs::write(&file, "time\n").unwrap();
        assert_eq!(get_csv_files(&file).unwrap(), vec![file]);
    }

    #[test]
    fn directory_of_csv_files_is_sorted() {
        let dir = tempdir().unwrap();
        for name in ["b.csv", "a.csv", "notes.txt"] {
            std::fs::write(dir.path().join(name), "time\n").unwrap();
        }
        let files = get_csv_files(dir.path()).unwrap();
        assert_eq!(files, vec![dir.path().join("a.csv"), dir.path().join("b.csv")]);
    }

    #[test]
    fn non_csv_and_empty_inputs_fail() {
        let dir = tempdir().unwrap();
        assert!(get_csv_files(dir.path()).is_err());
        let file = dir.path().join("walk.txt");
        std::fs::write(&file, "time\n").unwrap();
        assert!(get_csv_files(&file).is_err());
        assert!(get_csv_files(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn uppercase_extension_accepted() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("WALK.CSV");
        std::fs::write(&file, "time\n").unwrap();
        assert_eq!(get_csv_files(dir.path()).unwrap(), vec![file]);
    }

    #[test]
    fn output_names_follow_input() {
        let out = output_file_for(Path::new("/logs/park.csv"), Path::new("/out"));
        assert_eq!(out, PathBuf::from("/out/park_nav.csv"));
    }

    #[test]
    fn output_dir_is_created() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        ensure_output_dir(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
