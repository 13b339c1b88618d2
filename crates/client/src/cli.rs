// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `docdrop` command line: log in, upload documents, inspect the session.

use std::path::PathBuf;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::upload::task::{CandidateFile, TaskState};
use crate::upload::validate::format_size;
use crate::upload::QueueSnapshot;
use crate::Client;

/// Top-level CLI arguments.
#[derive(Debug, clap::Parser)]
#[command(name = "docdrop", version, about = "Upload documents to a docdrop server.")]
pub struct Cli {
    #[command(flatten)]
    pub config: ClientConfig,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Log in and save the session.
    Login(LoginArgs),
    /// Create an account and log in as it.
    Signup(SignupArgs),
    /// End the session and revoke its refresh token.
    Logout,
    /// Show the logged-in user.
    Whoami,
    /// Upload one or more documents.
    Upload(UploadArgs),
    /// List uploaded documents.
    Files,
}

#[derive(Debug, clap::Args)]
pub struct LoginArgs {
    /// Username or email.
    pub username: String,
    /// Password (read from stdin when omitted).
    #[arg(long, env = "DOCDROP_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

#[derive(Debug, clap::Args)]
pub struct SignupArgs {
    pub username: String,
    pub email: String,
    /// Password (read from stdin when omitted).
    #[arg(long, env = "DOCDROP_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

#[derive(Debug, clap::Args)]
pub struct UploadArgs {
    /// Files to upload.
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

/// Run one subcommand. Returns a process exit code.
pub async fn run(cli: Cli) -> anyhow::Result<i32> {
    let client = Client::open(&cli.config);
    match cli.command {
        Command::Login(args) => {
            let password = password_or_prompt(args.password).await?;
            let session = client.tokens.login(&args.username, &password).await?;
            if let Some(user) = session.user {
                println!("logged in as {} <{}>", user.username, user.email);
            }
            Ok(0)
        }
        Command::Signup(args) => {
            let password = password_or_prompt(args.password).await?;
            let session = client.tokens.signup(&args.username, &args.email, &password).await?;
            if let Some(user) = session.user {
                println!("registered {} <{}>", user.username, user.email);
            }
            Ok(0)
        }
        Command::Logout => {
            if let Some(revoke) = client.tokens.logout() {
                revoke.await.context("revocation task failed")?;
            }
            println!("logged out");
            Ok(0)
        }
        Command::Whoami => whoami(&client),
        Command::Upload(args) => upload(&client, args.paths).await,
        Command::Files => {
            let files = client.api.list_files().await?;
            if files.is_empty() {
                println!("no files");
            }
            for file in files {
                println!(
                    "{}\t{}\t{}\t{}",
                    file.id,
                    format_size(file.size),
                    file.uploaded_at,
                    file.original_name
                );
            }
            Ok(0)
        }
    }
}

fn whoami(client: &Client) -> anyhow::Result<i32> {
    let tokens = &client.tokens;
    if !tokens.is_authenticated() && tokens.refresh_token().is_none() {
        println!("not logged in");
        return Ok(1);
    }
    match (tokens.current_user(), tokens.claims()) {
        (Some(user), Some(claims)) => {
            println!("{} <{}> ({})", user.username, user.email, user.role);
            println!("access token expires at {} (epoch seconds)", claims.expires_at);
        }
        _ => println!("session expired, it will be refreshed on next use"),
    }
    Ok(0)
}

async fn upload(client: &Client, paths: Vec<PathBuf>) -> anyhow::Result<i32> {
    if !client.tokens.is_authenticated() && client.tokens.refresh_token().is_none() {
        anyhow::bail!("not logged in, run `docdrop login` first");
    }

    let mut candidates = Vec::with_capacity(paths.len());
    for path in &paths {
        let file = CandidateFile::from_path(path)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?;
        candidates.push(file);
    }

    let mut rejections = client.queue.rejections();
    let accepted = client.queue.add_files(candidates);
    let mut rejected = Vec::new();
    while let Ok(batch) = rejections.try_recv() {
        for rejection in batch {
            eprintln!("rejected {rejection}");
            rejected.push(rejection);
        }
    }
    if accepted.is_empty() {
        return Err(ClientError::Validation(rejected).into());
    }

    let snapshot = tokio::select! {
        snap = wait_idle(client) => snap,
        _ = tokio::signal::ctrl_c() => {
            client.queue.cancel_all();
            eprintln!("upload cancelled");
            return Ok(130);
        }
    };

    if snapshot.tasks.is_empty() {
        eprintln!("session ended, uploads cancelled");
        return Ok(1);
    }

    let mut failed = 0;
    for task in &snapshot.tasks {
        match task.state {
            TaskState::Success => {
                println!("uploaded {} ({})", task.original_name, format_size(task.size_bytes));
            }
            _ => {
                failed += 1;
                let reason = task.last_error.as_deref().unwrap_or("cancelled");
                eprintln!("failed {}: {reason}", task.original_name);
            }
        }
    }
    Ok(if failed + rejected.len() > 0 { 1 } else { 0 })
}

/// Wait until every queued task has settled or the queue was drained.
async fn wait_idle(client: &Client) -> QueueSnapshot {
    let mut states = client.queue.subscribe();
    loop {
        let snap = states.borrow_and_update().clone();
        if snap.is_idle() {
            return snap;
        }
        debug!(
            active = snap.active_count,
            pending = snap.count(TaskState::Pending),
            "waiting for uploads"
        );
        if states.changed().await.is_err() {
            return snap;
        }
    }
}

async fn password_or_prompt(password: Option<String>) -> anyhow::Result<String> {
    if let Some(password) = password {
        return Ok(password);
    }
    eprint!("password: ");
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("failed to read password")?;
    let password = line.trim_end_matches(['\r', '\n']).to_owned();
    anyhow::ensure!(!password.is_empty(), "empty password");
    Ok(password)
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
