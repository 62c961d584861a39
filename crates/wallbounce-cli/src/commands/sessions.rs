//! Implementation of the `wallbounce sessions` command.

use super::{build_orchestrator, Paths};

#[derive(clap::Args)]
pub struct SessionsArgs {
    #[command(subcommand)]
    pub action: SessionsAction,
}

#[derive(clap::Subcommand)]
pub enum SessionsAction {
    /// Create a new session and print its id
    New {
        /// Owning user id, for `sessions list`
        #[arg(long)]
        user: Option<String>,
    },
    /// List session ids for a user
    List {
        /// The owning user id
        #[arg(long)]
        user: String,
    },
    /// Show a session's turns
    Show {
        /// The session id
        id: String,
    },
    /// Delete a session
    Delete {
        /// The session id
        id: String,
    },
}

/// Execute the `wallbounce sessions` command.
pub async fn execute(paths: &Paths, args: SessionsArgs) -> i32 {
    let orchestrator = match build_orchestrator(paths).await {
        Ok(orchestrator) => orchestrator,
        Err(code) => return code,
    };

    match args.action {
        SessionsAction::New { user } => match orchestrator.create_session(user.as_deref()).await {
            Ok(session) => {
                println!("{}", session.session_id);
                0
            }
            Err(e) => {
                eprintln!("error: {e}");
                1
            }
        },
        SessionsAction::List { user } => match orchestrator.sessions_for_user(&user).await {
            Ok(ids) if ids.is_empty() => {
                eprintln!("no sessions for user {user}");
                0
            }
            Ok(ids) => {
                for id in ids {
                    println!("{id}");
                }
                0
            }
            Err(e) => {
                eprintln!("error: {e}");
                1
            }
        },
        SessionsAction::Show { id } => match orchestrator.get_session(&id).await {
            Ok(Some(session)) => {
                println!(
                    "session {} (created {}, {} turns)",
                    session.session_id,
                    session.created_at.format("%Y-%m-%d %H:%M:%S"),
                    session.turns.len()
                );
                for turn in &session.turns {
                    println!(
                        "  [turn {}] {} -> {} (confidence {:.2}, vendors {})",
                        turn.turn_index,
                        turn.query,
                        turn.winner_provider_id,
                        turn.confidence,
                        turn.vendors_used.join(",")
                    );
                }
                0
            }
            Ok(None) => {
                eprintln!("session not found: {id}");
                1
            }
            Err(e) => {
                eprintln!("error: {e}");
                1
            }
        },
        SessionsAction::Delete { id } => match orchestrator.delete_session(&id).await {
            Ok(()) => {
                eprintln!("deleted {id}");
                0
            }
            Err(e) => {
                eprintln!("error: {e}");
                1
            }
        },
    }
}
