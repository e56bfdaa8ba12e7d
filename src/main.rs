mod core_cli;

use crate::core_cli::Cli;
use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{error, info};
use rouilleftpc::core_log::init_logger;
use rouilleftpc::{CompletionCallback, Config, FtpClient};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

const SAMPLE_TEXT: &[u8] = b"This is a file that was\n\
transmitted from the rouilleftpc sample program.\n\
\n\
\n\
\n\
\n\
This sentence is not true.";

enum Upload {
    File {
        path: PathBuf,
        remote_name: Option<String>,
    },
    Text {
        remote_name: String,
    },
}

impl Upload {
    fn label(&self) -> String {
        match self {
            Upload::File { path, remote_name } => remote_name
                .clone()
                .unwrap_or_else(|| path.display().to_string()),
            Upload::Text { remote_name } => remote_name.clone(),
        }
    }
}

type Outcomes = Rc<RefCell<Vec<(String, bool)>>>;

fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Cli::parse();

    init_logger(args.verbose);

    let config = load_config(&args)?;
    let uploads = plan_uploads(&args)?;
    if uploads.is_empty() {
        bail!("Nothing to upload: pass files or --text NAME");
    }

    let outcomes: Outcomes = Rc::new(RefCell::new(Vec::new()));
    let total = uploads.len();
    let rejected = run(&config, uploads, &outcomes)?;

    let mut failed = rejected;
    for (name, success) in outcomes.borrow().iter() {
        if *success {
            info!("Uploaded {}", name);
        } else {
            error!("Failed to upload {}", name);
            failed += 1;
        }
    }

    if failed > 0 {
        bail!("{} of {} uploads failed", failed, total);
    }
    info!("All {} uploads completed", total);
    Ok(())
}

fn load_config(args: &Cli) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::default(),
    };

    match &args.url {
        Some(url) => config.client.apply_url(url)?,
        None if args.config.is_none() => bail!("Either --config or --url is required"),
        None => {}
    }
    Ok(config)
}

fn plan_uploads(args: &Cli) -> Result<VecDeque<Upload>> {
    if args.remote_name.is_some() && args.files.len() != 1 {
        bail!("--remote-name requires exactly one file");
    }

    let mut uploads: VecDeque<Upload> = args
        .files
        .iter()
        .map(|path| Upload::File {
            path: path.clone(),
            remote_name: args.remote_name.clone(),
        })
        .collect();
    if let Some(name) = &args.text {
        uploads.push_back(Upload::Text {
            remote_name: name.clone(),
        });
    }
    Ok(uploads)
}

/// Connects, logs in and drives every upload to completion.
///
/// Returns the number of uploads that could not even be queued.
fn run(config: &Config, mut uploads: VecDeque<Upload>, outcomes: &Outcomes) -> Result<usize> {
    let options = config.options();
    let poll_timeout = config.poll_timeout();
    let mut client = FtpClient::with_options(
        config.client.server_ip,
        config.client.port,
        config.client.username.as_deref(),
        config.client.password.as_deref(),
        options,
    )
    .context("Failed to create FTP client")?;
    let endpoint = client.server_endpoint();

    client
        .connect(Duration::ZERO)
        .with_context(|| format!("Failed to connect to {}", endpoint))?;

    let login_deadline = Instant::now() + options.connect_timeout;
    while !client.is_fully_connected() {
        if Instant::now() >= login_deadline {
            bail!("Timed out logging in to {}", endpoint);
        }
        client
            .poll(poll_timeout)
            .with_context(|| format!("Failed to log in to {}", endpoint))?;
    }

    let mut rejected = 0;
    while !uploads.is_empty() || client.has_pending_work() {
        while client.free_slots() > 0 {
            let Some(upload) = uploads.pop_front() else {
                break;
            };
            let label = upload.label();
            let queued = match upload {
                Upload::File { path, remote_name } => client.enqueue_send_file(
                    &path,
                    remote_name.as_deref(),
                    Some(record_outcome(outcomes, &label)),
                ),
                Upload::Text { remote_name } => client.enqueue_send(
                    &remote_name,
                    SAMPLE_TEXT,
                    Some(record_outcome(outcomes, &label)),
                ),
            };
            match queued {
                Ok(slot) => info!("Queued {} in slot {}", label, slot),
                Err(e) => {
                    error!("Cannot queue {}: {}", label, e);
                    rejected += 1;
                }
            }
        }

        client
            .poll(poll_timeout)
            .with_context(|| format!("Connection to {} failed while uploading", endpoint))?;
    }

    client.destroy();
    Ok(rejected)
}

fn record_outcome<'a>(outcomes: &Outcomes, label: &str) -> CompletionCallback<'a> {
    let outcomes = Rc::clone(outcomes);
    let label = label.to_string();
    Box::new(move |success| outcomes.borrow_mut().push((label, success)))
}
