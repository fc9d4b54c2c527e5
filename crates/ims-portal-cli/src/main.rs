//! `ims` — command-line client for the IMS student portal.

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde::Serialize;

use ims_portal::{
    resolve_store_path, AttendanceQuery, AuthOutcome, Credentials, PortalClient, PortalConfig,
    SessionStore,
};
use ims_portal_cli::prompt::PromptSolver;
use ims_portal_cli::render;

#[derive(Parser)]
#[command(
    name = "ims",
    about = "IMS student portal client — login once, then query profile, attendance and courses",
    version
)]
struct Cli {
    /// Path to the session database.
    /// Also reads IMS_SESSION_DB; defaults to ~/.ims-portal/session.db.
    #[arg(long, global = true)]
    session_db: Option<String>,

    /// Portal base URL.
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in, reusing the stored session when it is still valid.
    Login {
        /// Run the CAPTCHA login even if the stored session is live.
        #[arg(long)]
        force: bool,
    },

    /// Show the student profile.
    Profile,

    /// Show the attendance report.
    ///
    /// Without arguments the identity pre-filled by the portal is used.
    Attendance {
        /// Roll number.
        #[arg(long)]
        roll: Option<String>,

        /// Department (branch) name.
        #[arg(long)]
        dept: Option<String>,

        /// Degree.
        #[arg(long)]
        degree: Option<String>,
    },

    /// Show courses registered for the current semester.
    Courses,

    /// List portal links discovered at login.
    Links,

    /// Fetch profile, attendance and courses in one go.
    Snapshot,

    /// Show what the stored session contains.
    Status,

    /// Forget the stored session.
    Logout,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   ims completions bash > ~/.local/share/bash-completion/completions/ims
    ///   ims completions zsh > ~/.zfunc/_ims
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "ims", &mut std::io::stdout());
        return Ok(());
    }

    let config = match cli.base_url.as_deref() {
        Some(url) => PortalConfig::with_base_url(url).context("invalid --base-url")?,
        None => PortalConfig::default(),
    };
    let store = SessionStore::new(resolve_store_path(cli.session_db.as_deref()));
    tracing::debug!("Session store: {}", store.path().display());

    let mut client = PortalClient::open(config, store, Box::new(PromptSolver::default()))?;
    if let Ok(credentials) = Credentials::from_env() {
        client = client.with_credentials(credentials);
    }

    match cli.command {
        Commands::Login { force } => {
            let outcome = login(&mut client, force).await?;
            let message = match outcome {
                AuthOutcome::Resumed => "Stored session is still valid",
                AuthOutcome::LoggedIn => "Logged in",
            };
            if cli.json {
                print_json(&client.status())?;
            } else {
                println!("{message} ({} links)", client.links().len());
            }
        }

        Commands::Profile => {
            login(&mut client, false).await?;
            let profile = client.profile().await?;
            client.save_session()?;
            if cli.json {
                print_json(&profile)?;
            } else {
                print!("{}", render::render_record(&profile));
            }
        }

        Commands::Attendance { roll, dept, degree } => {
            login(&mut client, false).await?;
            let query = AttendanceQuery::new(
                roll.unwrap_or_default(),
                dept.unwrap_or_default(),
                degree.unwrap_or_default(),
            );
            let rows = client.attendance(&query).await?;
            client.save_session()?;
            if cli.json {
                print_json(&rows)?;
            } else {
                print!("{}", render::render_table(&rows));
            }
        }

        Commands::Courses => {
            login(&mut client, false).await?;
            let rows = client.enrolled_courses().await?;
            client.save_session()?;
            if cli.json {
                print_json(&rows)?;
            } else {
                print!("{}", render::render_table(&rows));
            }
        }

        Commands::Links => {
            if cli.json {
                print_json(client.links())?;
            } else {
                print!("{}", render::render_links(client.links()));
            }
        }

        Commands::Snapshot => {
            let snapshot = client.snapshot().await?;
            client.save_session()?;
            if cli.json {
                print_json(&snapshot)?;
            } else {
                println!("Profile");
                print!("{}", render::render_record(&snapshot_profile(&snapshot)));
                println!("\nAttendance");
                print!("{}", render::render_table(&snapshot.attendance));
                println!("\nCourses");
                print!("{}", render::render_table(&snapshot.courses));
            }
        }

        Commands::Status => {
            let status = client.status();
            if cli.json {
                print_json(&status)?;
            } else {
                print!("{}", render::render_status(&status));
            }
        }

        Commands::Logout => {
            client.logout()?;
            println!("Session cleared");
        }

        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}

/// Authenticate and save the cookie jar so the next run can resume.
///
/// Data commands save again after their request, since the portal may rotate
/// its session cookie on any page.
async fn login(client: &mut PortalClient, force: bool) -> anyhow::Result<AuthOutcome> {
    let outcome = client.authenticate(force).await.map_err(|e| {
        if matches!(e, ims_portal::PortalError::Config(_)) {
            anyhow::anyhow!("{e}; set IMS_USERNAME and IMS_PASSWORD")
        } else {
            anyhow::Error::new(e)
        }
    })?;
    client.save_session()?;
    Ok(outcome)
}

fn snapshot_profile(snapshot: &ims_portal::StudentSnapshot) -> ims_portal::Record {
    let p = &snapshot.profile;
    [
        ("Student ID", &p.student_id),
        ("Student Name", &p.name),
        ("DOB", &p.dob),
        ("Gender", &p.gender),
        ("Category", &p.category),
        ("Branch Name", &p.branch),
        ("Degree", &p.degree),
        ("Section", &p.section),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.clone()))
    .collect()
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
