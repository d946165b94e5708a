//! Main entry point for the zipcodec CLI application.
//!
//! This binary provides an unzip-style command-line interface for listing,
//! testing and extracting ZIP archives on the local filesystem.

use anyhow::{Result, bail};
use clap::Parser;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use zipcodec::zip::DosDateTime;
use zipcodec::{Cli, LocalFileReader, ReadAt, ZipEntry, ZipExtractor};

/// Application entry point.
///
/// Parses command-line arguments, opens the archive and dispatches to the
/// listing, testing or extraction handler.
fn main() -> Result<()> {
    let cli = Cli::parse();

    let reader = LocalFileReader::new(Path::new(&cli.file))?;
    let extractor = ZipExtractor::new(reader)?;

    if cli.test {
        return test_archive(&extractor, &cli);
    }

    let extracted = process_zip(&extractor, &cli)?;

    if !cli.is_quiet() && extracted > 0 {
        eprintln!("\nTotal bytes extracted: {}", format_size(extracted));
    }

    Ok(())
}

/// Process a ZIP archive based on CLI options.
///
/// This function handles both listing and extraction modes:
/// - List mode (`-l` or `-v`): Display archive contents
/// - Extract mode: Extract files matching the specified filters
///
/// # Arguments
///
/// * `extractor` - The ZIP extractor instance
/// * `cli` - Parsed command-line arguments
///
/// # Returns
///
/// The number of bytes extracted, or an error if processing fails.
fn process_zip<R: ReadAt>(extractor: &ZipExtractor<R>, cli: &Cli) -> Result<u64> {
    // List mode: display archive contents and exit
    if cli.list || cli.verbose {
        list_files(extractor, cli.verbose);
        return Ok(0);
    }

    // Extract mode: get all entries from the archive
    let entries = extractor.list_files();

    // Apply filters to determine which files to extract:
    // 1. Skip directories (they are created automatically during extraction)
    // 2. If specific files are requested, only include matching entries
    // 3. Exclude files matching the exclusion patterns
    let files_to_extract: Vec<_> = entries
        .iter()
        .filter(|e| {
            // Skip directory entries
            if e.is_dir() {
                return false;
            }

            // If specific files are requested via positional arguments,
            // only include entries that match
            if !cli.files.is_empty() {
                let matches = cli.files.iter().any(|f| {
                    if has_glob_chars(f) {
                        // Pattern contains wildcards: use glob matching
                        glob_match(f, e.name())
                    } else {
                        // No wildcards: exact match on filename or full path
                        let basename = Path::new(e.name())
                            .file_name()
                            .map(|s| s.to_string_lossy())
                            .unwrap_or_default();
                        e.name() == *f || basename == *f
                    }
                });
                if !matches {
                    return false;
                }
            }

            // Exclude files matching the -x patterns
            if cli
                .exclude
                .iter()
                .any(|x| e.name().contains(x.as_str()) || glob_match(x, e.name()))
            {
                return false;
            }

            true
        })
        .collect();

    // Extract each matching file
    let multiple_files = cli.pipe && files_to_extract.len() > 1;
    let mut total = 0u64;
    for entry in files_to_extract {
        total += extract_file(extractor, entry, cli, multiple_files)?;
    }

    Ok(total)
}


/// Verify every entry in the archive (`-t`).
///
/// Each entry is decompressed and its size and CRC-32 checked against the
/// central directory. Returns an error if any entry fails.
fn test_archive<R: ReadAt>(extractor: &ZipExtractor<R>, cli: &Cli) -> Result<()> {
    let failures = extractor.test_all();

    if !cli.is_very_quiet() {
        for entry in extractor.list_files() {
            match failures.iter().find(|(name, _)| name == entry.name()) {
                Some((_, err)) => println!("    testing: {:<40}  {}", entry.name(), err),
                None if !cli.is_quiet() => println!("    testing: {:<40}  OK", entry.name()),
                None => {}
            }
        }
    }

    if !failures.is_empty() {
        bail!(
            "{} of {} entries failed verification in {}",
            failures.len(),
            extractor.list_files().len(),
            cli.file
        );
    }

    if !cli.is_very_quiet() {
        let total: u64 = extractor.list_files().iter().filter_map(ZipEntry::size).sum();
        println!(
            "No errors detected in compressed data of {} ({}).",
            cli.file,
            format_size(total)
        );
    }

    Ok(())
}

/// List files in the ZIP archive.
///
/// Supports two output formats:
/// - Simple format (`-l`): Just file names, one per line
/// - Verbose format (`-v`): Detailed table with size, compression ratio, and timestamps
///
/// # Arguments
///
/// * `extractor` - The ZIP extractor instance
/// * `verbose` - If true, display detailed information in table format
fn list_files<R: ReadAt>(extractor: &ZipExtractor<R>, verbose: bool) {
    let entries = extractor.list_files();

    if verbose {
        // Print table header for verbose output
        println!(
            "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
            "Length", "Size", "Cmpr", "Date", "Time"
        );
        println!("{}", "-".repeat(70));
    }

    // Track totals for summary line
    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in entries {
        if !verbose {
            // Simple format: just the file name
            println!("{}", entry.name());
            continue;
        }

        let size = entry.size().unwrap_or(0);
        let compressed = entry.compressed_size().unwrap_or(0);

        // Entries without a DOS timestamp print as the earliest DOS date
        let dos = entry.dos_time().unwrap_or(DosDateTime::MIN);
        let (year, month, day) = dos.date_parts();
        let (hour, minute, _second) = dos.time_parts();

        println!(
            "{:>10}  {:>10}  {}  {:04}-{:02}-{:02}  {:02}:{:02}  {}",
            size,
            compressed,
            ratio(compressed, size),
            year,
            month,
            day,
            hour,
            minute,
            entry.name()
        );

        // Accumulate totals (excluding directories)
        if !entry.is_dir() {
            total_uncompressed += size;
            total_compressed += compressed;
            file_count += 1;
        }
    }

    // Print summary line in verbose mode
    if verbose {
        println!("{}", "-".repeat(70));
        println!(
            "{:>10}  {:>10}  {}  {:>21}  {} files",
            total_uncompressed,
            total_compressed,
            ratio(total_compressed, total_uncompressed),
            "",
            file_count
        );
    }
}

/// Percentage saved by compression, formatted for the listing table.
fn ratio(compressed: u64, size: u64) -> String {
    if size > 0 && compressed <= size {
        format!("{:>4}%", 100 - (compressed * 100 / size))
    } else {
        "  0%".to_string()
    }
}

/// Extract a single file from the archive.
///
/// Handles various extraction options:
/// - Pipe mode (`-p`): Write to stdout instead of file
/// - Custom output directory (`-d`): Extract to specified directory
/// - Junk paths (`-j`): Ignore directory structure in archive
/// - Overwrite control (`-n`, `-o`): Handle existing files
///
/// # Arguments
///
/// * `extractor` - The ZIP extractor instance
/// * `entry` - The ZIP entry to extract
/// * `cli` - Parsed command-line arguments
/// * `show_filename` - If true, print filename marker before content (for pipe mode with multiple files)
///
/// # Returns
///
/// The number of bytes written, zero when the entry was skipped.
fn extract_file<R: ReadAt>(
    extractor: &ZipExtractor<R>,
    entry: &ZipEntry,
    cli: &Cli,
    show_filename: bool,
) -> Result<u64> {
    // Pipe mode: write file contents directly to stdout
    if cli.pipe {
        let mut stdout = io::stdout().lock();
        if show_filename {
            writeln!(stdout, "--- {} ---", entry.name())?;
        }
        let n = extractor.extract_to(entry, &mut stdout)?;
        stdout.flush()?;
        return Ok(n);
    }

    let Some(output_path) = output_path(entry, cli) else {
        eprintln!("Skipping: {} (path leaves the extraction directory)", entry.name());
        return Ok(0);
    };

    // Handle existing files based on overwrite options
    if output_path.exists() {
        if cli.never_overwrite {
            // -n flag: never overwrite, skip silently (unless quiet)
            if !cli.is_quiet() {
                eprintln!("Skipping: {} (file exists)", entry.name());
            }
            return Ok(0);
        }

        if !cli.overwrite {
            // Default behavior: skip with suggestion to use -o
            if !cli.is_quiet() {
                eprintln!("Skipping: {} (use -o to overwrite)", entry.name());
            }
            return Ok(0);
        }
        // -o flag: overwrite without prompting (fall through to extraction)
    }

    // Display extraction progress
    if !cli.is_quiet() {
        println!("  extracting: {}", entry.name());
    }

    extractor.extract_to_file(entry, &output_path)?;

    Ok(entry.size().unwrap_or(0))
}

/// Where `entry` lands on disk, or `None` when its name would put it
/// outside the extraction directory.
///
/// With `-j` only the last name component is kept, which drops any `..`
/// or root prefix along with the rest of the directory part.
fn output_path(entry: &ZipEntry, cli: &Cli) -> Option<PathBuf> {
    let relative = if cli.junk_paths {
        PathBuf::from(Path::new(entry.name()).file_name()?)
    } else {
        entry.enclosed_name()?
    };
    Some(match cli.extract_dir {
        Some(ref dir) => PathBuf::from(dir).join(relative),
        None => relative,
    })
}

/// Check if a pattern contains glob wildcard characters.
///
/// # Arguments
///
/// * `pattern` - The pattern to check
///
/// # Returns
///
/// Returns `true` if the pattern contains `*` or `?` wildcards.
fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Simple glob pattern matching supporting `*` and `?` wildcards.
///
/// This is a basic implementation for file matching:
/// - `*` matches zero or more characters
/// - `?` matches exactly one character
///
/// # Arguments
///
/// * `pattern` - The glob pattern to match against
/// * `text` - The text to check for a match
///
/// # Returns
///
/// Returns `true` if the text matches the pattern, `false` otherwise.
///
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern_chars: Vec<char> = pattern.chars().collect();
    let text_chars: Vec<char> = text.chars().collect();

    /// Recursive helper function for glob matching.
    ///
    /// Uses a simple backtracking algorithm to handle `*` wildcards.
    fn do_match(pattern: &[char], text: &[char]) -> bool {
        match (pattern.first(), text.first()) {
            // Both exhausted: match successful
            (None, None) => true,
            // Star matches zero or more characters
            (Some('*'), _) => {
                // Try matching zero characters (skip the star)
                // OR matching one character (keep the star for more)
                do_match(&pattern[1..], text) || (!text.is_empty() && do_match(pattern, &text[1..]))
            }
            // Question mark matches exactly one character
            (Some('?'), Some(_)) => do_match(&pattern[1..], &text[1..]),
            // Literal character match
            (Some(p), Some(t)) if *p == *t => do_match(&pattern[1..], &text[1..]),
            // No match
            _ => false,
        }
    }

    do_match(&pattern_chars, &text_chars)
}

/// Format a byte size into a human-readable string.
///
/// Automatically selects the appropriate unit (bytes, KB, MB, GB)
/// based on the size magnitude.
///
/// # Arguments
///
/// * `size` - The size in bytes to format
///
/// # Returns
///
/// A formatted string with the size and appropriate unit.
///
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_paths_stay_inside_the_target() {
        let cli = Cli::try_parse_from(["zipcodec", "a.zip", "-d", "out"]).unwrap();
        let path = |name: &str| output_path(&ZipEntry::new(name), &cli);
        assert_eq!(path("docs/a.txt"), Some(PathBuf::from("out/docs/a.txt")));
        assert_eq!(path("../evil.txt"), None);
        assert_eq!(path("docs/../../evil.txt"), None);
        assert_eq!(path("/etc/passwd"), None);

        let junk = Cli::try_parse_from(["zipcodec", "-j", "a.zip", "-d", "out"]).unwrap();
        let path = |name: &str| output_path(&ZipEntry::new(name), &junk);
        assert_eq!(path("../evil.txt"), Some(PathBuf::from("out/evil.txt")));
        assert_eq!(path("/etc/passwd"), Some(PathBuf::from("out/passwd")));
        assert_eq!(path(".."), None);
    }

    #[test]
    fn glob_wildcards() {
        assert!(glob_match("*.txt", "readme.txt"));
        assert!(glob_match("file?.dat", "file1.dat"));
        assert!(glob_match("docs/*", "docs/a/b.md"));
        assert!(!glob_match("*.txt", "readme.md"));
        assert!(!glob_match("file?.dat", "file.dat"));
        assert!(has_glob_chars("a*"));
        assert!(!has_glob_chars("plain.txt"));
    }

    #[test]
    fn sizes_pick_a_unit() {
        assert_eq!(format_size(500), "500 bytes");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(1048576), "1.00 MB");
    }

    #[test]
    fn ratio_handles_empty_and_expanded_entries() {
        assert_eq!(ratio(25, 100), "  75%");
        assert_eq!(ratio(0, 0), "  0%");
        assert_eq!(ratio(120, 100), "  0%");
    }
}
