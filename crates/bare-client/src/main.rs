// Copyright (c) 2026 Roman Barinov <rbarinov@gmail.com>
// Licensed under the FSL-1.1-NC.

use bare_client::{config, BareClient, FetchInit, RedirectPolicy};
use bare_core::BareHeaders;

use clap::Parser;
use http::Method;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "bare-fetch")]
#[command(about = "Fetch a URL through a bare server", version)]
struct Args {
    /// URL of the remote to fetch
    url: String,

    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Bare server root, overrides the config file
    #[arg(short, long, value_name = "URL")]
    server: Option<String>,

    #[arg(short = 'X', long, default_value = "GET")]
    method: Method,

    /// Request header as `Name: value`, may repeat
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    headers: Vec<String>,

    #[arg(short, long)]
    data: Option<String>,

    /// follow, error or manual
    #[arg(long, default_value = "follow")]
    redirect: RedirectPolicy,
}

fn parse_headers(raw: &[String]) -> anyhow::Result<BareHeaders> {
    let mut headers = BareHeaders::new();
    for line in raw {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("header must look like `Name: value`: {}", line))?;
        headers.append(name.trim(), value.trim());
    }
    Ok(headers)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bare_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let mut config = config::Config::read(args.config)?;
    if let Some(server) = args.server {
        config.server.url = server;
    }
    config.validate()?;

    let client = BareClient::new(&config)?;
    let init = FetchInit {
        method: args.method,
        headers: parse_headers(&args.headers)?,
        body: args.data.map(Into::into),
        redirect: args.redirect,
        ..Default::default()
    };

    let response = client.fetch(&args.url, init).await?;
    tracing::info!("{} {} ({})", response.status, response.status_text, response.final_url);

    println!("{} {}", response.status, response.status_text);
    for (name, value) in response.raw_headers.iter() {
        for v in value.values() {
            println!("{}: {}", name, v);
        }
    }
    println!();
    print!("{}", response.text().await?);
    Ok(())
}
