use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use bollard::auth::DockerCredentials;
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use linkrun::docker::{self, BuildParams, CancelToken, ContainerSpec, ImageEvent, OutputSink, Tokens};
use linkrun::{Orchestrator, RunError, config};

#[derive(Parser)]
#[command(name = "linkrun")]
#[command(about = "Run containers and linked server/client container pairs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one container to completion
    Run(ContainerArgs),

    /// Start a server container, then run a client linked to it as `solver`
    RunLinked {
        /// YAML file with `server` and `client` container specs
        #[arg(long, conflicts_with_all = ["server", "client"])]
        file: Option<PathBuf>,

        /// Server image
        #[arg(long, requires = "client")]
        server: Option<String>,

        /// Server command line
        #[arg(long)]
        server_command: Option<String>,

        /// Server container name, also its link alias
        #[arg(long)]
        server_name: Option<String>,

        /// Client image
        #[arg(long, requires = "server")]
        client: Option<String>,

        /// Client command line
        #[arg(long)]
        client_command: Option<String>,

        /// Keep the server running after the client succeeds
        #[arg(long)]
        keep_server: bool,
    },

    /// Build an image from a directory
    Build {
        /// Code directory the build context must stay inside
        #[arg(long, default_value = ".")]
        code_dir: PathBuf,

        /// Build context, relative to the code directory
        #[arg(long, default_value = ".")]
        build: String,

        /// Image tag
        #[arg(long)]
        tag: String,

        /// Dockerfile path inside the build context
        #[arg(long)]
        dockerfile: Option<String>,
    },

    /// Pull an image
    Pull {
        image: String,
        #[command(flatten)]
        auth: AuthArgs,
    },

    /// Push an image
    Push {
        image: String,
        #[command(flatten)]
        auth: AuthArgs,
    },
}

#[derive(Args)]
struct ContainerArgs {
    /// Image to run
    image: String,

    /// Command line, split on whitespace
    #[arg(long)]
    command: Option<String>,

    /// Entrypoint line, split on whitespace
    #[arg(long)]
    entrypoint: Option<String>,

    /// Environment entry as KEY=VALUE (repeatable)
    #[arg(long = "env", short = 'e')]
    env: Vec<String>,

    /// Bind mount as HOST:CONTAINER[:MODE] (repeatable)
    #[arg(long = "bind", short = 'v')]
    binds: Vec<String>,

    /// Container name
    #[arg(long)]
    name: Option<String>,
}

#[derive(Args)]
struct AuthArgs {
    /// Registry user
    #[arg(long, env = "DOCKER_USER")]
    user: Option<String>,

    /// Registry password
    #[arg(long, env = "DOCKER_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

#[derive(Deserialize)]
struct LinkedFile {
    server: ContainerSpec,
    client: ContainerSpec,
}

impl From<ContainerArgs> for ContainerSpec {
    fn from(args: ContainerArgs) -> Self {
        Self {
            image: args.image,
            command: args.command.map(Tokens::Line),
            entrypoint: args.entrypoint.map(Tokens::Line),
            env: non_empty(args.env),
            links: None,
            binds: non_empty(args.binds),
            name: args.name,
        }
    }
}

impl AuthArgs {
    fn credentials(self) -> Option<DockerCredentials> {
        let username = self.user?;
        Some(DockerCredentials {
            username: Some(username),
            password: self.password,
            ..Default::default()
        })
    }
}

fn non_empty(list: Vec<String>) -> Option<Vec<String>> {
    if list.is_empty() { None } else { Some(list) }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match dispatch(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(exit_status(&e))
        }
    }
}

/// A container's own non-zero status becomes the process exit code.
fn exit_status(err: &anyhow::Error) -> u8 {
    let status = err.downcast_ref::<RunError>().and_then(RunError::status);
    match status.and_then(|s| u8::try_from(s).ok()) {
        Some(code) if code != 0 => code,
        _ => 1,
    }
}

async fn dispatch(command: Commands) -> Result<()> {
    let cwd = std::env::current_dir().context("cannot read working directory")?;
    let config = config::load(&cwd)?.unwrap_or_default().resolve_env();
    let orch = Orchestrator::connect(config)?;
    docker::ensure_available(orch.engine()).await?;

    match command {
        Commands::Run(args) => {
            let cancel = cancel_on_ctrl_c();
            let spec = ContainerSpec::from(args);
            let outcome = orch.run(&spec, OutputSink::Stdio, &cancel).await?;
            info!(container = %outcome.container.short_id(), "run succeeded");
        }
        Commands::RunLinked {
            file,
            server,
            server_command,
            server_name,
            client,
            client_command,
            keep_server,
        } => {
            let (server, client) = match (file, server, client) {
                (Some(path), _, _) => {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    let linked: LinkedFile = serde_yaml::from_str(&text)
                        .with_context(|| format!("invalid linked run in {}", path.display()))?;
                    (linked.server, linked.client)
                }
                (None, Some(server), Some(client)) => (
                    ContainerSpec {
                        command: server_command.map(Tokens::Line),
                        name: server_name,
                        ..ContainerSpec::new(server)
                    },
                    ContainerSpec {
                        command: client_command.map(Tokens::Line),
                        ..ContainerSpec::new(client)
                    },
                ),
                _ => anyhow::bail!("pass either --file or both --server and --client"),
            };
            run_linked(&orch, &server, &client, keep_server).await?;
        }
        Commands::Build {
            code_dir,
            build,
            tag,
            dockerfile,
        } => {
            let params = BuildParams {
                build,
                tag,
                dockerfile,
            };
            let tag = orch.build(&code_dir, &params).await?;
            println!("{tag}");
        }
        Commands::Pull { image, auth } => {
            orch.pull(&image, auth.credentials(), print_progress).await?;
        }
        Commands::Push { image, auth } => {
            orch.push(&image, auth.credentials(), print_progress).await?;
        }
    }
    Ok(())
}

async fn run_linked(
    orch: &Orchestrator,
    server: &ContainerSpec,
    client: &ContainerSpec,
    keep_server: bool,
) -> Result<()> {
    let cancel = cancel_on_ctrl_c();
    let outcome = orch
        .run_linked(server, client, OutputSink::Stdio, &cancel)
        .await?;

    if keep_server {
        info!(server = %outcome.server.id, "leaving server running");
        return Ok(());
    }

    // The exit watcher removes the server once it has stopped.
    if let Err(e) = orch.stop(&outcome.server).await {
        warn!("{e}");
    }
    let _ = outcome.server_watch.await;
    Ok(())
}

fn print_progress(event: &ImageEvent) {
    match (&event.id, &event.status, &event.progress) {
        (Some(id), Some(status), Some(progress)) => eprintln!("{id}: {status} {progress}"),
        (Some(id), Some(status), None) => eprintln!("{id}: {status}"),
        (None, Some(status), _) => eprintln!("{status}"),
        _ => {}
    }
}

/// Token that fires on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancelToken {
    let cancel = CancelToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, tearing down");
            token.cancel();
        }
    });
    cancel
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_run_linked_flags() {
        let cli = Cli::try_parse_from([
            "linkrun",
            "run-linked",
            "--server",
            "srvimg",
            "--server-name",
            "srv1",
            "--client",
            "evalimg",
            "--client-command",
            "python eval.py",
        ])
        .unwrap();
        match cli.command {
            Commands::RunLinked {
                server, client, server_name, ..
            } => {
                assert_eq!(server.as_deref(), Some("srvimg"));
                assert_eq!(client.as_deref(), Some("evalimg"));
                assert_eq!(server_name.as_deref(), Some("srv1"));
            }
            _ => panic!("expected run-linked"),
        }
    }

    #[test]
    fn run_args_become_spec() {
        let cli = Cli::try_parse_from([
            "linkrun", "run", "alpine", "--command", "echo hi", "-e", "A=1",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        let spec = ContainerSpec::from(args);
        assert_eq!(spec.command, Some(Tokens::Line("echo hi".into())));
        assert_eq!(spec.env, Some(vec!["A=1".to_string()]));
        assert!(spec.binds.is_none());
    }

    #[test]
    fn user_status_becomes_exit_code() {
        let err = anyhow::Error::new(RunError::User {
            message: "evalimg failed with status 3".into(),
            status: Some(3),
        });
        assert_eq!(exit_status(&err), 3);
        assert_eq!(exit_status(&anyhow::anyhow!("no daemon")), 1);
    }

    #[test]
    fn credentials_need_a_user() {
        let none = AuthArgs {
            user: None,
            password: Some("p".into()),
        };
        assert!(none.credentials().is_none());
    }
}
