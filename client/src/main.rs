use std::{
    io::{stderr, IsTerminal},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Result};
use clap::Parser;
use common::helpers::parse_period;
use kdam::term;
use log::{error, info};
use reqwest::Client;
use tokio::{spawn, sync::watch};
use tokio_util::sync::CancellationToken;

mod observer;
mod screen;
mod transport;

use observer::{HttpProgressSource, Navigation, Observer, ObserverConfig, Strategy};
use screen::{refresh, Page, Screen};
use transport::{LocalFile, SubmitOptions, Transport, UploadOutcome};

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Submits an accounts file for validation", long_about = None)]
struct Args {
    /// Accounts file (XHTML or ZIP). Leave out to see how the server reacts.
    pub file: Option<PathBuf>,

    #[arg(short, long, env = "XBRL_VALIDATE_URL", default_value = "http://localhost:3000/xbrl_validate")]
    pub base_url: String,

    /// Results page; defaults to `<base-url>/result`.
    #[arg(long)]
    pub results_url: Option<String>,

    #[arg(long, default_value = "/error")]
    pub error_url: String,

    /// Opened on completion instead of the results page. `{fileId}` is replaced.
    #[arg(long)]
    pub callback_url: Option<String>,

    #[arg(long, value_enum, default_value_t = Strategy::Stream)]
    pub strategy: Strategy,

    #[arg(long, default_value = "5s", value_parser = parse_period)]
    pub poll_interval: Duration,

    #[arg(long, default_value = "15m", value_parser = parse_period)]
    pub timeout: Duration,

    #[arg(long, default_value = "file")]
    pub field_name: String,

    #[arg(long)]
    pub package_type: Option<String>,

    #[arg(long)]
    pub company_number: Option<String>,

    /// Ask the server to check the file before uploading it.
    #[arg(long)]
    pub preflight: bool,
}

async fn submit(client: Client, args: Args, tty: bool) -> Result<Navigation> {
    let base_url = args.base_url.trim_end_matches('/').to_string();
    let results_url = args
        .results_url
        .clone()
        .unwrap_or_else(|| format!("{base_url}/result"));
    let error_url = args.error_url.clone();
    let transport = Transport::new(client.clone(), &base_url, &args.field_name);
    let file = match &args.file {
        Some(path) => Some(LocalFile::read(path).await?),
        None => None,
    };

    let mut screen = Screen::new(tty);
    if args.preflight {
        let errors = transport.preflight(file.as_ref()).await?;
        if !errors.is_empty() {
            screen.show_field_errors(&errors);
            bail!("the server would reject this file");
        }
    }

    screen.show(Page::Pending);
    let (sender, receiver) = watch::channel(0u8);
    let sender = Arc::new(sender);
    let token = CancellationToken::new();
    let screen_task = spawn(refresh(screen, token.clone(), receiver));

    let options = SubmitOptions {
        package_type: args.package_type.clone(),
        company_number: args.company_number.clone(),
    };
    let upload_progress = sender.clone();
    let outcome = transport
        .upload(file, &options, move |p| {
            let _ = upload_progress.send(p);
        })
        .await;

    let navigation = match outcome {
        UploadOutcome::Accepted(file_id) => {
            info!("Upload accepted as file [{file_id}]");
            let source = HttpProgressSource::new(client, &base_url, &results_url);
            let observer = Observer::new(
                source,
                ObserverConfig {
                    strategy: args.strategy,
                    results_base_url: results_url,
                    error_url,
                    callback_url: args.callback_url,
                    poll_interval: args.poll_interval,
                    timeout: args.timeout,
                },
            );
            observer
                .observe(&file_id, |p| {
                    let _ = sender.send(p);
                })
                .await
        }
        UploadOutcome::Rejected(errors) => {
            token.cancel();
            let mut screen = screen_task.await?;
            screen.show_field_errors(&errors);
            bail!("the server rejected the upload");
        }
        UploadOutcome::Failed(reason) => {
            error!("Error occurred while uploading file: {reason}");
            Navigation::Error(error_url)
        }
    };

    token.cancel();
    let screen = screen_task.await?;
    screen.finish(match navigation {
        Navigation::Results(_) => "Validation complete.",
        Navigation::Error(_) => "Validation could not be completed.",
    });
    Ok(navigation)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("warn"));
    let is_tty = stderr().is_terminal();
    term::init(is_tty);
    let args = Args::parse();

    let client = Client::builder()
        .user_agent(concat!("bullseye-client/", env!("CARGO_PKG_VERSION")))
        .tcp_keepalive(Some(Duration::from_secs(30)))
        .build()?;

    let navigation = submit(client, args, is_tty).await?;
    println!("{}", navigation.url());
    if let Navigation::Error(_) = navigation {
        bail!("validation did not complete");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(["bullseye-client", "accounts.zip"]).unwrap();
        assert_eq!(args.file, Some(PathBuf::from("accounts.zip")));
        assert_eq!(args.strategy, Strategy::Stream);
        assert_eq!(args.timeout, Duration::from_secs(15 * 60));
        assert_eq!(args.field_name, "file");
        assert!(!args.preflight);
    }

    #[test]
    fn polling_options() {
        let args = Args::try_parse_from([
            "bullseye-client",
            "--strategy",
            "poll",
            "--poll-interval",
            "500",
            "--callback-url",
            "/done/{fileId}",
        ])
        .unwrap();
        assert_eq!(args.file, None);
        assert_eq!(args.strategy, Strategy::Poll);
        assert_eq!(args.poll_interval, Duration::from_millis(500));
        assert_eq!(args.callback_url.as_deref(), Some("/done/{fileId}"));
    }

    #[test]
    fn zero_periods_are_rejected() {
        for flag in ["--poll-interval", "--timeout"] {
            assert!(Args::try_parse_from(["bullseye-client", flag, "0"]).is_err(), "{flag}");
        }
    }
}
