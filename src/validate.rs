//! Input validation for barrier-driven worker pools.
//!
//! The barrier never inspects these values; a driver program runs the checks
//! up front and hands the core two validated integers (the work-item count
//! and the worker count) plus the file names. Every check returns a
//! [`WallResult`] so that only the top-level entry point decides to
//! terminate the process.

use std::fs::OpenOptions;
use std::path::Path;

use crate::error::{WallError, WallResult};

/// Upper bound on the work-item count.
pub const MAX_ITEMS: usize = 10_000_000;

/// Validate the work-item and worker counts.
///
/// Returns the effective worker count: a request for more workers than work
/// items is clamped to the item count with a warning rather than rejected,
/// so the worker count never exceeds `items`. A worker count above the
/// available core count is legal but also warned about.
pub fn validate_counts(items: usize, workers: usize) -> WallResult<usize> {
    if items == 0 || workers == 0 {
        return Err(WallError::invalid_input(
            "item and worker counts must be greater than zero",
        ));
    }
    if items > MAX_ITEMS {
        return Err(WallError::invalid_input(format!(
            "item count {} exceeds the maximum of {}",
            items, MAX_ITEMS
        )));
    }

    let workers = if workers > items {
        log::warn!(
            "requested {} workers for {} items; clamping to {}",
            workers,
            items,
            items
        );
        items
    } else {
        workers
    };

    if let Ok(cores) = std::thread::available_parallelism() {
        if workers > cores.get() {
            log::warn!(
                "requested {} workers but only {} cores are available",
                workers,
                cores
            );
        }
    }

    Ok(workers)
}

/// Validate the input/output path pair.
///
/// Rejects empty or whitespace-only names, an output identical to the
/// input, and an output location that cannot be created or written. The
/// writability probe leaves an existing output file's contents alone.
pub fn validate_io_paths(input: &Path, output: &Path) -> WallResult<()> {
    if is_blank(input) || is_blank(output) {
        return Err(WallError::invalid_input(
            "input and output file names cannot be empty or whitespace",
        ));
    }
    if input == output {
        return Err(WallError::invalid_input(
            "input and output files must be different",
        ));
    }
    OpenOptions::new()
        .write(true)
        .create(true)
        .open(output)
        .map_err(|e| {
            WallError::invalid_input(format!(
                "output file '{}' cannot be created or written: {}",
                output.display(),
                e
            ))
        })?;
    Ok(())
}

fn is_blank(path: &Path) -> bool {
    path.as_os_str().to_string_lossy().trim().is_empty()
}

/// Check that `path` exists and holds at least `items` whitespace-separated
/// unsigned integers.
///
/// The failure modes get distinct messages: a file that cannot be opened
/// versus one that runs out of numbers versus a non-integer token.
pub fn check_input_numbers(path: &Path, items: usize) -> WallResult<()> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        WallError::invalid_input(format!(
            "input file '{}' does not exist or cannot be opened: {}",
            path.display(),
            e
        ))
    })?;

    let mut found = 0usize;
    for token in content.split_whitespace() {
        token.parse::<u32>().map_err(|_| {
            WallError::Parse(format!(
                "input file '{}' contains a non-integer token '{}'",
                path.display(),
                token
            ))
        })?;
        found += 1;
        if found == items {
            return Ok(());
        }
    }
    Err(WallError::invalid_input(format!(
        "fewer than {} numbers in input file '{}'",
        items,
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_file(prefix: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "shmwall_{}_{}_{}",
            prefix,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ))
    }

    #[test]
    fn counts_zero_rejected() {
        assert!(validate_counts(0, 4).is_err());
        assert!(validate_counts(100, 0).is_err());
    }

    #[test]
    fn counts_over_max_rejected() {
        assert!(validate_counts(MAX_ITEMS + 1, 4).is_err());
    }

    #[test]
    fn counts_clamped_to_items() {
        assert_eq!(validate_counts(3, 8).expect("clamp"), 3);
        assert_eq!(validate_counts(100, 4).expect("pass"), 4);
        assert_eq!(validate_counts(MAX_ITEMS, 1).expect("max"), 1);
    }

    #[test]
    fn blank_paths_rejected() {
        let out = scratch_file("out");
        assert!(validate_io_paths(Path::new(""), &out).is_err());
        assert!(validate_io_paths(Path::new("   "), &out).is_err());
        assert!(validate_io_paths(&out, Path::new("")).is_err());
    }

    #[test]
    fn identical_paths_rejected() {
        let p = scratch_file("same");
        assert!(validate_io_paths(&p, &p).is_err());
    }

    #[test]
    fn writable_output_accepted() {
        let input = scratch_file("in");
        let output = scratch_file("out");
        std::fs::write(&input, "1 2 3").expect("write input");
        validate_io_paths(&input, &output).expect("valid pair");
        let _ = std::fs::remove_file(&input);
        let _ = std::fs::remove_file(&output);
    }

    #[test]
    fn probe_preserves_existing_output() {
        let input = scratch_file("in2");
        let output = scratch_file("out2");
        std::fs::write(&input, "1").expect("write input");
        std::fs::write(&output, "previous result").expect("write output");
        validate_io_paths(&input, &output).expect("valid pair");
        assert_eq!(
            std::fs::read_to_string(&output).expect("read output"),
            "previous result"
        );
        let _ = std::fs::remove_file(&input);
        let _ = std::fs::remove_file(&output);
    }

    #[test]
    fn missing_input_rejected() {
        let missing = scratch_file("missing");
        let err = check_input_numbers(&missing, 3).unwrap_err();
        assert!(err.to_string().contains("cannot be opened"), "got {}", err);
    }

    #[test]
    fn enough_numbers_accepted() {
        let input = scratch_file("nums");
        std::fs::write(&input, "5 3 9\n12\t7").expect("write input");
        check_input_numbers(&input, 5).expect("exactly enough");
        check_input_numbers(&input, 3).expect("more than enough");
        let _ = std::fs::remove_file(&input);
    }

    #[test]
    fn too_few_numbers_rejected() {
        let input = scratch_file("few");
        std::fs::write(&input, "1 2").expect("write input");
        let err = check_input_numbers(&input, 3).unwrap_err();
        assert!(err.to_string().contains("fewer than 3"), "got {}", err);
        let _ = std::fs::remove_file(&input);
    }

    #[test]
    fn non_integer_token_rejected() {
        let input = scratch_file("junk");
        std::fs::write(&input, "1 two 3").expect("write input");
        let err = check_input_numbers(&input, 3).unwrap_err();
        assert!(matches!(err, WallError::Parse(_)), "got {:?}", err);
        let _ = std::fs::remove_file(&input);
    }
}
