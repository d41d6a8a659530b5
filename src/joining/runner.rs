use std::fs;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use log::info;
use serde::Serialize;

use crate::joining::bionj::BionjMatrix;
use crate::joining::bounding::BoundingBionjMatrix;
use crate::joining::nj::NjMatrix;
use crate::joining::vectorised::VectorisedBionjMatrix;
use crate::joining::JoinMethod;
use crate::matrix::reader::read_distance_matrix;
use crate::tree::newick::write_newick_file;

/// Reads a distance matrix, runs BIONJ, and writes the Newick tree.
pub fn construct_tree(input_path: &Path, output_path: &Path) -> Result<()> {
    construct_tree_with_log(input_path, output_path, JoinMethod::Bionj, None)
}

/// Reads a distance matrix, runs the bounding variant, writes its tree, then
/// runs the lane-blocked BIONJ on the same input for a timing comparison.
pub fn construct_tree_rapid(input_path: &Path, output_path: &Path) -> Result<()> {
    construct_tree_with_log(input_path, output_path, JoinMethod::RapidBionj, None)
}

/// Reads a distance matrix, runs classical NJ, and writes the Newick tree.
pub fn construct_tree_nj(input_path: &Path, output_path: &Path) -> Result<()> {
    construct_tree_with_log(input_path, output_path, JoinMethod::Nj, None)
}

/// Full entry point: any method, with an optional JSON run log.
pub fn construct_tree_with_log(
    input_path: &Path,
    output_path: &Path,
    method: JoinMethod,
    run_log_path: Option<&Path>,
) -> Result<()> {
    let t_total = Instant::now();

    let t_load = Instant::now();
    let input = read_distance_matrix(input_path)
        .with_context(|| format!("reading distance matrix '{}'", input_path.display()))?;
    let load_sec = t_load.elapsed().as_secs_f64();
    let n = input.labels.len();
    info!("Loaded {n}x{n} distance matrix in {load_sec:.3}s");

    let t_join = Instant::now();
    let (forest, entries_visited) = match method {
        JoinMethod::Nj => (NjMatrix::from_input(&input)?.run()?, None),
        JoinMethod::Bionj => (BionjMatrix::from_input(&input)?.run()?, None),
        JoinMethod::RapidBionj => {
            let (forest, visited) = BoundingBionjMatrix::from_input(&input)?.run()?;
            (forest, Some(visited))
        }
    };
    let join_sec = t_join.elapsed().as_secs_f64();
    println!(
        "Elapsed time for the neighbour-joining phase ({}), {:.6}",
        method.as_str(),
        join_sec
    );
    if let Some(visited) = entries_visited {
        println!("Visited {visited} sorted-row entries during the minimum-Q search");
    }

    let clusters = forest.len();
    let t_write = Instant::now();
    write_newick_file(&forest, output_path)
        .with_context(|| format!("writing tree '{}'", output_path.display()))?;
    let write_sec = t_write.elapsed().as_secs_f64();
    info!("Wrote {} ({clusters} clusters)", output_path.display());

    if method == JoinMethod::RapidBionj {
        // Timing comparison only; the bounded tree above is the output.
        let vectorised = VectorisedBionjMatrix::from_input(&input)?;
        let t_compare = Instant::now();
        vectorised.run()?;
        println!(
            "Elapsed time for the neighbour-joining phase (vectorised bionj), {:.6}",
            t_compare.elapsed().as_secs_f64()
        );
    }

    if let Some(log_path) = run_log_path {
        let log = RunLog {
            input: input_path.display().to_string(),
            output: output_path.display().to_string(),
            matrix: MatrixMeta {
                n,
                npairs: n * (n - 1) / 2,
                symmetry_pairs_fixed: input.symmetry_pairs_fixed,
            },
            join: JoinMeta {
                method: method.as_str().to_string(),
                clusters,
                entries_visited,
            },
            timings: RunTimings {
                load_sec,
                join_sec,
                write_sec,
                total_sec: t_total.elapsed().as_secs_f64(),
            },
            system: system_stats(),
        };
        fs::write(log_path, serde_json::to_string_pretty(&log)?)
            .with_context(|| format!("writing run log '{}'", log_path.display()))?;
        info!("Run log written: {}", log_path.display());
    }

    Ok(())
}

/* ───────────── run-log structs ───────────── */

#[derive(Serialize)]
struct MatrixMeta {
    n: usize,
    npairs: usize,
    symmetry_pairs_fixed: usize,
}

#[derive(Serialize)]
struct JoinMeta {
    method: String,
    clusters: usize,
    entries_visited: Option<u64>,
}

#[derive(Serialize)]
struct RunTimings {
    load_sec: f64,
    join_sec: f64,
    write_sec: f64,
    total_sec: f64,
}

#[derive(Serialize)]
struct SystemStats {
    os: String,
    arch: String,
    num_cpus: usize,
    rayon_threads: usize,
    peak_rss_bytes: Option<u64>,
    current_rss_bytes: u64,
}

#[derive(Serialize)]
struct RunLog {
    input: String,
    output: String,
    matrix: MatrixMeta,
    join: JoinMeta,
    timings: RunTimings,
    system: SystemStats,
}

/* ───────────── system / memory ───────────── */

fn system_stats() -> SystemStats {
    SystemStats {
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        num_cpus: num_cpus::get(),
        rayon_threads: rayon::current_num_threads(),
        peak_rss_bytes: peak_rss_bytes(),
        current_rss_bytes: current_rss_bytes(),
    }
}

fn current_rss_bytes() -> u64 {
    use sysinfo::System;
    let mut sys = System::new();
    sys.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
    if let Ok(pid) = sysinfo::get_current_pid() {
        if let Some(process) = sys.process(pid) {
            return process.memory();
        }
    }
    0
}

#[cfg(target_os = "linux")]
fn peak_rss_bytes() -> Option<u64> {
    // VmHWM in /proc/self/status is "<num> kB".
    let status = fs::read_to_string("/proc/self/status").ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmHWM:") {
            let kb = rest.split_whitespace().next()?.parse::<u64>().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

#[cfg(target_os = "macos")]
fn peak_rss_bytes() -> Option<u64> {
    // ru_maxrss is bytes on macOS.
    unsafe {
        let mut usage: libc::rusage = std::mem::zeroed();
        if libc::getrusage(libc::RUSAGE_SELF, &mut usage) == 0 {
            return Some(usage.ru_maxrss as u64);
        }
    }
    None
}

#[cfg(any(target_os = "freebsd", target_os = "openbsd", target_os = "netbsd"))]
fn peak_rss_bytes() -> Option<u64> {
    // ru_maxrss is kilobytes on the BSDs.
    unsafe {
        let mut usage: libc::rusage = std::mem::zeroed();
        if libc::getrusage(libc::RUSAGE_SELF, &mut usage) == 0 {
            return Some((usage.ru_maxrss as u64) * 1024);
        }
    }
    None
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd"
)))]
fn peak_rss_bytes() -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("fast_nj_{}_{name}", std::process::id()))
    }

    const ADDITIVE_FOUR: &str = "4\nA 0 3 5 6\nB 3 0 6 7\nC 5 6 0 7\nD 6 7 7 0\n";

    #[test]
    fn bionj_file_to_file() {
        let input = scratch("bionj.dist");
        let output = scratch("bionj.nwk");
        fs::write(&input, ADDITIVE_FOUR).unwrap();
        construct_tree(&input, &output).unwrap();
        let newick = fs::read_to_string(&output).unwrap();
        assert_eq!(newick, "((A:1.0,B:2.0):1.0,D:4.0,C:3.0);\n");
        fs::remove_file(&input).ok();
        fs::remove_file(&output).ok();
    }

    #[test]
    fn rapid_writes_the_bounded_tree() {
        let input = scratch("rapid.dist");
        let output = scratch("rapid.nwk");
        fs::write(&input, ADDITIVE_FOUR).unwrap();
        construct_tree_rapid(&input, &output).unwrap();
        let newick = fs::read_to_string(&output).unwrap();
        assert_eq!(newick, "((A:1.0,B:2.0):1.0,D:4.0,C:3.0);\n");
        fs::remove_file(&input).ok();
        fs::remove_file(&output).ok();
    }

    #[test]
    fn asymmetric_input_is_repaired_and_joined() {
        let input = scratch("asym.dist");
        let output = scratch("asym.nwk");
        fs::write(
            &input,
            "4\nA 0 3 5 6\nB 3.2 0 6 7\nC 5 6 0 7\nD 6 7 7 0\n",
        )
        .unwrap();
        construct_tree_nj(&input, &output).unwrap();
        let newick = fs::read_to_string(&output).unwrap();
        assert!(newick.ends_with(";\n"));
        let names = crate::tree::parser::parse_newick(&newick).unwrap().leaf_names();
        assert_eq!(names.len(), 4);
        fs::remove_file(&input).ok();
        fs::remove_file(&output).ok();
    }

    #[test]
    fn run_log_records_the_join() {
        let input = scratch("log.dist");
        let output = scratch("log.nwk");
        let log = scratch("log.json");
        fs::write(&input, ADDITIVE_FOUR).unwrap();
        construct_tree_with_log(&input, &output, JoinMethod::RapidBionj, Some(&log)).unwrap();
        let parsed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&log).unwrap()).unwrap();
        assert_eq!(parsed["matrix"]["n"], 4);
        assert_eq!(parsed["join"]["method"], "rapid-bionj");
        assert!(parsed["join"]["entries_visited"].as_u64().unwrap() > 0);
        fs::remove_file(&input).ok();
        fs::remove_file(&output).ok();
        fs::remove_file(&log).ok();
    }

    #[test]
    fn missing_input_fails_without_output() {
        let input = scratch("missing.dist");
        let output = scratch("missing.nwk");
        assert!(construct_tree(&input, &output).is_err());
        assert!(!output.exists());
    }
}
