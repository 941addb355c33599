//! End-to-end scenarios across sweep, extraction and training.
//!
//! The solver is faked by a shell mover; each test stages the status, lock
//! and result files the real solver would leave behind.

use std::fs;
use std::path::Path;
use tempfile::TempDir;

use crate::config::{self, Dimension};
use crate::extract::fixtures::indentation_export;
use crate::job::tests::stage;
use crate::ledger::{read_param_ledger, read_report, REPORT_HEADER, SUMMARY_HEADER};
use crate::sweep::{JobStatus, SweepDriver};
use crate::wait::CancelToken;

const TEMPLATE: &str = "E=YOUNGSMODULUS Y=YIELDSTRESS";
const COMPLETED: &str = "THE ANALYSIS HAS COMPLETED SUCCESSFULLY\n";
const NOT_COMPLETED: &str = "  STEP 1 INCREMENT 3\n THE ANALYSIS HAS NOT BEEN COMPLETED\n";

fn setup(dir: &Path) -> config::Root {
    let cfg = config::sample(dir);
    fs::write(&cfg.sweep.template, TEMPLATE).unwrap();
    cfg
}

/// Stage what a finished solver run leaves behind: status file, result set
/// and its JSON export.
fn fake_solver_output(dir: &Path, job: &str, status: &str, stiffness: f64) {
    stage(dir, &format!("{}.sta", job), status);
    stage(dir, &format!("{}.odb", job), "");
    stage(dir, &format!("{}.msg", job), "");
    let export = serde_json::to_string(&indentation_export(3, stiffness)).unwrap();
    stage(dir, &format!("{}.json", job), &export);
}

fn eight_jobs(cfg: &mut config::Root) {
    cfg.sweep.dimensions = vec![
        Dimension { name: "YoungsModulus".into(), token: "YOUNGSMODULUS".into(), start: 100.0, end: 400.0, count: 4 },
        Dimension { name: "YieldStress".into(), token: "YIELDSTRESS".into(), start: 10.0, end: 20.0, count: 2 },
    ];
}

#[test]
fn test_sweep_writes_decks_ledger_and_archive() {
    let dir = TempDir::new().unwrap();
    let cfg = setup(dir.path());
    fake_solver_output(dir.path(), "Job-0001", COMPLETED, 100.0);
    fake_solver_output(dir.path(), "Job-0002", COMPLETED, 200.0);

    let report = SweepDriver::new(&cfg, CancelToken::new()).run().unwrap();
    assert_eq!(report.total, 2);
    assert_eq!(report.completed, 2);

    let archive = &cfg.sweep.archive_dir;
    assert_eq!(
        fs::read_to_string(archive.join("Job-0001.inp")).unwrap(),
        "E=       100.0 Y=        10.0"
    );
    assert_eq!(
        fs::read_to_string(archive.join("Job-0002.inp")).unwrap(),
        "E=       200.0 Y=        10.0"
    );
    assert!(archive.join("Job-0002.odb").exists());
    assert!(!dir.path().join("Job-0001.inp").exists());

    // scratch files removed after a successful run
    assert!(!dir.path().join("Job-0001.sta").exists());
    assert!(!dir.path().join("Job-0001.msg").exists());

    let rows = read_param_ledger(&cfg.sweep.param_ledger, 2).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!((rows[0].number, rows[0].params.clone()), (1, vec![100.0, 10.0]));
    assert_eq!((rows[1].number, rows[1].params.clone()), (2, vec![200.0, 10.0]));
    assert!(rows.iter().all(|r| r.status == JobStatus::Completed));
}

#[test]
fn test_failed_job_is_left_for_inspection() {
    let dir = TempDir::new().unwrap();
    let cfg = setup(dir.path());
    fake_solver_output(dir.path(), "Job-0001", COMPLETED, 100.0);
    fake_solver_output(dir.path(), "Job-0002", NOT_COMPLETED, 200.0);

    let report = SweepDriver::new(&cfg, CancelToken::new()).run().unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(report.failed, 1);

    for ext in ["inp", "sta", "odb", "msg"] {
        assert!(dir.path().join(format!("Job-0002.{}", ext)).exists(), "{}", ext);
    }
    assert!(!cfg.sweep.archive_dir.join("Job-0002.inp").exists());
    assert!(!cfg.sweep.archive_dir.join("Job-0002.odb").exists());

    let rows = read_param_ledger(&cfg.sweep.param_ledger, 2).unwrap();
    assert_eq!(rows[0].status, JobStatus::Completed);
    assert_eq!(rows[1].status, JobStatus::Failed);
}

#[test]
fn test_lock_file_delays_validation() {
    let dir = TempDir::new().unwrap();
    let cfg = setup(dir.path());
    fake_solver_output(dir.path(), "Job-0001", COMPLETED, 100.0);
    fake_solver_output(dir.path(), "Job-0002", COMPLETED, 200.0);
    stage(dir.path(), "Job-0001.lck", "");
    let lock = dir.path().join("Job-0001.lck");

    let releaser = std::thread::spawn(move || {
        for _ in 0..400 {
            if lock.exists() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        std::thread::sleep(std::time::Duration::from_millis(100));
        fs::remove_file(lock).unwrap();
    });
    let report = SweepDriver::new(&cfg, CancelToken::new()).run().unwrap();
    releaser.join().unwrap();

    assert_eq!(report.completed, 2);
    assert!(cfg.sweep.archive_dir.join("Job-0001.odb").exists());
}

#[test]
fn test_missing_status_file_times_out_as_failed() {
    let dir = TempDir::new().unwrap();
    let mut cfg = setup(dir.path());
    cfg.solver.timeout_secs = Some(0.05);
    fake_solver_output(dir.path(), "Job-0002", COMPLETED, 200.0);

    let report = SweepDriver::new(&cfg, CancelToken::new()).run().unwrap();
    assert_eq!(report.aborted, 1);
    assert_eq!(report.completed, 1);

    let rows = read_param_ledger(&cfg.sweep.param_ledger, 2).unwrap();
    assert_eq!(rows[0].status, JobStatus::Failed);
    assert_eq!(rows[1].status, JobStatus::Completed);
}

#[test]
fn test_parallel_sweep_keeps_ledger_in_job_order() {
    let dir = TempDir::new().unwrap();
    let mut cfg = setup(dir.path());
    cfg.sweep.workers = 3;
    eight_jobs(&mut cfg);
    for n in 1..=8 {
        fake_solver_output(dir.path(), &format!("Job-{:04}", n), COMPLETED, 10.0 * n as f64);
    }

    let report = SweepDriver::new(&cfg, CancelToken::new()).run().unwrap();
    assert_eq!(report.completed, 8);

    let rows = read_param_ledger(&cfg.sweep.param_ledger, 2).unwrap();
    let numbers: Vec<u32> = rows.iter().map(|r| r.number).collect();
    assert_eq!(numbers, (1..=8).collect::<Vec<u32>>());
    // last axis varies fastest
    assert_eq!(rows[0].params, vec![100.0, 10.0]);
    assert_eq!(rows[1].params, vec![100.0, 20.0]);
    assert_eq!(rows[2].params, vec![200.0, 10.0]);
    assert_eq!(rows[7].params, vec![400.0, 20.0]);
}

#[test]
fn test_parallel_sweep_stops_after_fatal_error() {
    let dir = TempDir::new().unwrap();
    let mut cfg = setup(dir.path());
    cfg.sweep.workers = 2;
    eight_jobs(&mut cfg);
    for n in 1..=8 {
        fake_solver_output(dir.path(), &format!("Job-{:04}", n), COMPLETED, 10.0 * n as f64);
    }
    // deck cannot be written over a directory
    fs::create_dir(dir.path().join("Job-0001.inp")).unwrap();

    let err = SweepDriver::new(&cfg, CancelToken::new()).run().unwrap_err();
    assert!(format!("{:#}", err).contains("sweep stage failed at Job-0001"));

    // only the job already running on the other worker may finish
    let archived = fs::read_dir(&cfg.sweep.archive_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map_or(false, |x| x == "odb"))
        .count();
    assert!(archived <= 1, "{} jobs archived after the failure", archived);
}

#[test]
fn test_sequential_rerun_after_failure_grades_new_status() {
    let dir = TempDir::new().unwrap();
    let cfg = setup(dir.path());
    fake_solver_output(dir.path(), "Job-0001", COMPLETED, 100.0);
    fake_solver_output(dir.path(), "Job-0002", NOT_COMPLETED, 200.0);
    let first = SweepDriver::new(&cfg, CancelToken::new()).run().unwrap();
    assert_eq!(first.failed, 1);
    assert!(dir.path().join("Job-0002.sta").exists());

    fake_solver_output(dir.path(), "Job-0001", COMPLETED, 100.0);
    fake_solver_output(dir.path(), "Job-0002", COMPLETED, 200.0);
    let second = SweepDriver::new(&cfg, CancelToken::new()).run().unwrap();
    assert_eq!(second.completed, 2);
    assert!(cfg.sweep.archive_dir.join("Job-0002.odb").exists());

    let rows = read_param_ledger(&cfg.sweep.param_ledger, 2).unwrap();
    assert!(rows.iter().all(|r| r.status == JobStatus::Completed));
}

#[test]
fn test_cancelled_sweep_is_fatal() {
    let dir = TempDir::new().unwrap();
    let cfg = setup(dir.path());
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = SweepDriver::new(&cfg, cancel).run().unwrap_err();
    assert!(err.to_string().contains("cancelled"));
    assert!(read_param_ledger(&cfg.sweep.param_ledger, 2).unwrap().is_empty());
}

#[test]
fn test_full_pipeline_sweep_extract_train() {
    let dir = TempDir::new().unwrap();
    let mut cfg = setup(dir.path());
    cfg.sweep.extra_archive_extensions = vec!["json".to_string()];
    fake_solver_output(dir.path(), "Job-0001", COMPLETED, 100.0);
    fake_solver_output(dir.path(), "Job-0002", COMPLETED, 200.0);
    let out = dir.path().join("results");
    let text = "[study]\nname = \"indentation\"\n";

    let sweep = crate::run_sweep(&cfg, text, &out, CancelToken::new()).unwrap();
    assert_eq!(sweep.completed, 2);

    let extracted = crate::run_extract(&cfg, text, &out).unwrap();
    assert_eq!(extracted.summaries.len(), 2);
    assert!(extracted.skipped.is_empty());

    let summary = fs::read_to_string(&cfg.extract.results_ledger).unwrap();
    let lines: Vec<&str> = summary.lines().collect();
    assert_eq!(lines[0], SUMMARY_HEADER);
    assert!(lines[1].starts_with("Job-0001 "));
    assert!(lines[2].starts_with("Job-0002 "));

    let report_path = cfg.extract.report_dir.join("Job-0002.rpt");
    assert!(fs::read_to_string(&report_path).unwrap().starts_with(REPORT_HEADER));
    let rows = read_report(&report_path).unwrap();
    assert_eq!(rows.len(), 3);
    assert!((rows[2].force - 200.0).abs() < 1e-9);
    assert!((rows[2].displacement - 0.1).abs() < 1e-9);

    let trained = crate::run_train(&cfg, text, &out).unwrap();
    assert_eq!(trained.samples, 2);
    assert_eq!(trained.models.len(), 3);
    assert_eq!(trained.prediction_files, 6);

    let nn = &cfg.surrogate.output_dir;
    for job in ["Job-0001", "Job-0002"] {
        assert!(nn.join("forward_predictions").join(format!("{}_curve_pred.dat", job)).exists());
        assert!(nn.join("inverse_predictions/full").join(format!("{}_params_pred.dat", job)).exists());
        assert!(nn.join("inverse_predictions/binned_2").join(format!("{}_params_pred.dat", job)).exists());
    }

    for file in ["sweep_summary.json", "extract_summary.json", "training_summary.json"] {
        let bundle: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.join(file)).unwrap()).unwrap();
        assert_eq!(bundle["manifest"]["config_hash"].as_str().unwrap().len(), 64);
        assert_eq!(bundle["manifest"]["study"], "indentation");
    }
}

#[test]
fn test_training_without_reports_is_fatal() {
    let dir = TempDir::new().unwrap();
    let cfg = setup(dir.path());
    fake_solver_output(dir.path(), "Job-0001", COMPLETED, 100.0);
    fake_solver_output(dir.path(), "Job-0002", COMPLETED, 200.0);
    SweepDriver::new(&cfg, CancelToken::new()).run().unwrap();

    let err = crate::run_train(&cfg, "", &dir.path().join("results")).unwrap_err();
    assert!(err.to_string().contains("dataset is empty"));
}
