mod config;
mod engine;
mod frames;

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use config::Config;
use engine::{spawn_engine, EngineError, EngineHandle, EngineSettings};
use frames::PrecomputedExtractor;
use rollcall_core::{
    DescriptorExtractor, EnrollmentState, EnrollmentWorkflow, FaceDecision, FrameReport,
    LectureSelection, Outcome,
};
use rollcall_store::{report_file_name, ReportProjector, Store, TextTableProjector};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-matched lecture attendance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a student from pre-extracted sample frames
    Enroll {
        /// Student ID (e.g., "S001")
        #[arg(long)]
        id: String,
        /// Student's full name
        #[arg(long)]
        name: String,
        /// JSON Lines file of sample frames, or "-" for stdin
        #[arg(long, default_value = "-")]
        samples: PathBuf,
    },
    /// Remove a student and their attendance history
    Remove {
        /// Student ID to remove
        id: String,
    },
    /// List enrolled students
    List {
        #[arg(long)]
        json: bool,
    },
    /// Run a scan session over a stream of frames, taking attendance for today
    Scan {
        #[command(flatten)]
        lecture: LectureArg,
        /// JSON Lines file of frames, or "-" for stdin
        #[arg(long, default_value = "-")]
        frames: PathBuf,
        /// Write the lecture report to the reports directory when done
        #[arg(long)]
        save_report: bool,
    },
    /// Print the attendance report for one lecture
    Report {
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        lecture: u32,
        #[arg(long)]
        json: bool,
        /// Also write the report to the reports directory
        #[arg(long)]
        save: bool,
    },
    /// Show attendance statistics
    Stats {
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        json: bool,
    },
    /// Manage admin credentials (password is read from stdin)
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Create an admin or replace their password
    SetPassword { username: String },
    /// Check a password; exits non-zero on mismatch
    Verify { username: String },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct LectureArg {
    /// Record into this lecture number
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    lecture: Option<u32>,
    /// Record into the next unused lecture number for the date
    #[arg(long)]
    next_lecture: bool,
}

impl LectureArg {
    fn selection(&self) -> LectureSelection {
        match self.lecture {
            Some(n) => LectureSelection::Explicit(n),
            None => LectureSelection::NextForDate,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    std::fs::create_dir_all(&config.reports_dir).with_context(|| {
        format!("failed to create reports directory {}", config.reports_dir.display())
    })?;
    let store = open_store(&config)?;

    match cli.command {
        Commands::Enroll { id, name, samples } => {
            let engine = start_engine(&config, store)?;
            enroll(&config, &engine, &id, &name, &samples).await?;
        }
        Commands::Remove { id } => {
            let engine = start_engine(&config, store)?;
            if engine.remove(id.clone()).await? {
                println!("Removed {id}");
            } else {
                bail!("student {id} is not enrolled");
            }
        }
        Commands::List { json } => {
            let students = store.list_students()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&students)?);
            } else if students.is_empty() {
                println!("No students enrolled");
            } else {
                for s in &students {
                    println!("{}\t{}\t{}", s.student_id, s.name, s.enrolled_at.format("%Y-%m-%d"));
                }
            }
        }
        Commands::Scan {
            lecture,
            frames,
            save_report,
        } => {
            // Rows are stamped with the wall clock, so sessions always run
            // on today's date.
            let date = today();
            let engine = start_engine(&config, store)?;
            let key = scan(&engine, date, lecture.selection(), &frames).await?;
            if save_report {
                let store = open_store(&config)?;
                let path = save(&config, &store, key.date, key.lecture_number, false)?;
                println!("Report saved to {}", path.display());
            }
        }
        Commands::Report {
            date,
            lecture,
            json,
            save: save_file,
        } => {
            let date = date.unwrap_or_else(today);
            let report = store.attendance_report(date, lecture)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", TextTableProjector.render(&report));
            }
            if save_file {
                let path = save(&config, &store, date, lecture, json)?;
                println!("Report saved to {}", path.display());
            }
        }
        Commands::Stats { date, json } => {
            let stats = store.statistics(date.unwrap_or_else(today))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Total students:   {}", stats.total_students);
                println!("Attending today:  {}", stats.attending_today);
                println!("Recent lectures:");
                for l in &stats.recent_lectures {
                    println!("  {} lecture {}: {} students", l.date, l.lecture_number, l.students);
                }
                println!("Top attendees:");
                for a in &stats.top_attendees {
                    println!("  {} {}: {}", a.student_id, a.name, a.attendances);
                }
            }
        }
        Commands::Admin { command } => match command {
            AdminCommands::SetPassword { username } => {
                let password = read_password().await?;
                store.set_admin_password(&username, &password)?;
                println!("Password set for {username}");
            }
            AdminCommands::Verify { username } => {
                if !store.has_admins()? {
                    bail!("no administrators configured; run `rollcall admin set-password <user>` first");
                }
                let password = read_password().await?;
                if !store.verify_admin(&username, &password)? {
                    bail!("invalid credentials for {username}");
                }
                println!("OK");
            }
        },
    }

    Ok(())
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn open_store(config: &Config) -> Result<Store> {
    Store::open(&config.db_path, &config.descriptor_dir).with_context(|| {
        format!("failed to open attendance store {}", config.db_path.display())
    })
}

fn start_engine(config: &Config, store: Store) -> Result<EngineHandle> {
    let settings = EngineSettings {
        distance_threshold: config.distance_threshold,
        process_interval: config.process_interval,
    };
    Ok(spawn_engine(store, settings)?)
}

type FrameLines = tokio::io::Lines<Box<dyn AsyncBufRead + Unpin + Send>>;

async fn open_frames(path: &Path) -> Result<FrameLines> {
    let reader: Box<dyn AsyncBufRead + Unpin + Send> = if path == Path::new("-") {
        Box::new(BufReader::new(tokio::io::stdin()))
    } else {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;
        Box::new(BufReader::new(file))
    };
    Ok(reader.lines())
}

async fn enroll(
    config: &Config,
    engine: &EngineHandle,
    id: &str,
    name: &str,
    samples: &Path,
) -> Result<()> {
    let mut workflow = EnrollmentWorkflow::begin(id, name, config.capture_policy())?;
    let mut extractor = PrecomputedExtractor;
    let mut lines = open_frames(samples).await?;
    let mut line_no = 0;

    while workflow.state() == EnrollmentState::Capturing {
        let Some(line) = lines.next_line().await.context("failed to read samples")? else {
            break;
        };
        line_no += 1;

        let detections = match frames::parse_line(line_no, &line)
            .and_then(|frame| frame.map(|f| extractor.extract(&f)).transpose())
        {
            Ok(Some(detections)) => detections,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "unusable sample frame");
                continue;
            }
        };

        match workflow.add_sample(detections) {
            Ok(_) => println!(
                "Sample {}/{} captured",
                workflow.samples_collected(),
                config.enroll_samples.max(1)
            ),
            Err(e) => println!("Sample skipped: {e}"),
        }
    }

    let enrollment = workflow.commit()?;
    let samples = enrollment.samples;
    engine
        .enroll(enrollment)
        .await
        .with_context(|| format!("failed to enroll {id}"))?;
    println!("Enrolled {} ({}) from {samples} samples", id.trim(), name.trim());
    Ok(())
}

async fn scan(
    engine: &EngineHandle,
    date: NaiveDate,
    selection: LectureSelection,
    frames: &Path,
) -> Result<rollcall_core::LectureKey> {
    let lines = open_frames(frames).await?;
    let key = engine.start_session(date, selection).await?;
    println!("Scanning lecture {} on {}", key.lecture_number, key.date);

    let driven = drive_scan(engine, lines).await;
    let summary = engine.end_session().await?;
    driven?;

    println!(
        "Session ended: {} frames processed, {} students matched",
        summary.ticks, summary.students_processed
    );
    Ok(key)
}

/// Feed frames to the engine until input ends or Ctrl-C. Interrupts are only
/// observed while waiting for input, so a tick always runs to completion.
async fn drive_scan(engine: &EngineHandle, mut lines: FrameLines) -> Result<()> {
    let mut extractor = PrecomputedExtractor;
    let mut line_no = 0;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let line = tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("interrupted; ending session");
                return Ok(());
            }
            line = lines.next_line() => line.context("failed to read frames")?,
        };
        let Some(line) = line else {
            return Ok(());
        };
        line_no += 1;

        let frame = match frames::parse_line(line_no, &line) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "skipping frame");
                continue;
            }
        };
        let detections = match extractor.extract(&frame) {
            Ok(detections) => detections,
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "skipping frame");
                continue;
            }
        };

        match engine.frame(frame.offset(), detections).await {
            Ok(Some(report)) => print_decisions(&report),
            Ok(None) => {}
            Err(EngineError::TickAborted { partial, source }) => {
                print_decisions(&partial);
                return Err(source).context("attendance write failed; session stopped");
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn print_decisions(report: &FrameReport) {
    for decision in &report.decisions {
        match decision {
            FaceDecision::Recorded {
                student_id,
                outcome: Outcome::Inserted,
                ..
            } => println!("Attendance marked for {student_id}"),
            FaceDecision::Recorded {
                student_id,
                outcome: Outcome::AlreadyRecorded,
                ..
            } => println!("Attendance already recorded for {student_id}"),
            FaceDecision::NotEnrolled { student_id, .. } => {
                println!("{student_id} is no longer enrolled; not recorded")
            }
            _ => {}
        }
    }
}

fn save(
    config: &Config,
    store: &Store,
    date: NaiveDate,
    lecture_number: u32,
    json: bool,
) -> Result<PathBuf> {
    let report = store.attendance_report(date, lecture_number)?;
    let (contents, extension) = if json {
        (serde_json::to_string_pretty(&report)?, "json")
    } else {
        let projector = TextTableProjector;
        (projector.render(&report), projector.extension())
    };
    let path = config
        .reports_dir
        .join(report_file_name(date, lecture_number, extension));
    std::fs::write(&path, contents)
        .with_context(|| format!("failed to write report {}", path.display()))?;
    Ok(path)
}

async fn read_password() -> Result<String> {
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("failed to read password from stdin")?;
    Ok(line.trim_end_matches(|c: char| c == '\r' || c == '\n').to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_requires_lecture_choice() {
        assert!(Cli::try_parse_from(["rollcall", "scan"]).is_err());
        assert!(Cli::try_parse_from(["rollcall", "scan", "--lecture", "2", "--next-lecture"]).is_err());
        assert!(Cli::try_parse_from(["rollcall", "scan", "--lecture", "0"]).is_err());

        let cli = Cli::try_parse_from(["rollcall", "scan", "--lecture", "2"]).unwrap();
        let Commands::Scan { lecture, .. } = cli.command else {
            panic!("expected scan");
        };
        assert_eq!(lecture.selection(), LectureSelection::Explicit(2));
    }

    #[test]
    fn test_scan_always_uses_today() {
        assert!(Cli::try_parse_from(["rollcall", "scan", "--next-lecture", "--date", "2026-01-05"]).is_err());
    }

    #[test]
    fn test_report_accepts_past_dates() {
        let cli = Cli::try_parse_from(["rollcall", "report", "--date", "2026-01-05", "--lecture", "1"]).unwrap();
        assert!(matches!(cli.command, Commands::Report { date: Some(_), lecture: 1, .. }));
    }
}
