//! Headless mode runner - event loop without UI
//!
//! Logs in, opens the realtime session, and mirrors session and store changes
//! to stdout as [`HeadlessEvent`]s until the user quits or is signed out.

use std::path::PathBuf;

use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use chatwire_app::config::{load_settings, Settings};
use chatwire_app::{ChatClient, DefaultChatClient};
use chatwire_client::gateway::HttpBackend;
use chatwire_client::session::{Connector, SessionState};
use chatwire_client::{Credential, SignOutReason};
use chatwire_core::prelude::*;

use super::command::{parse_command, Command};
use super::HeadlessEvent;

const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Everything headless mode needs from the command line.
#[derive(Debug, Clone, Default)]
pub struct HeadlessOptions {
    /// Directory holding `.chatwire/config.toml`
    pub dir: PathBuf,
    pub identifier: Option<String>,
    pub password: Option<String>,
    /// Skip login and connect with this access token
    pub token: Option<String>,
    /// Rooms to join once connected
    pub rooms: Vec<String>,
    pub api_url: Option<String>,
    pub socket_url: Option<String>,
}

/// Run in headless mode - output JSON events instead of a UI
pub async fn run_headless(options: HeadlessOptions) -> Result<()> {
    info!("═══════════════════════════════════════════════════════");
    info!("chatwire starting in HEADLESS mode");
    info!("Config dir: {}", options.dir.display());
    info!("═══════════════════════════════════════════════════════");

    let mut settings = load_settings(&options.dir);
    if let Some(url) = &options.api_url {
        settings.server.api_url = url.clone();
    }
    if let Some(url) = &options.socket_url {
        settings.server.socket_url = url.clone();
    }

    let result = run_session(&settings, &options).await;
    if let Err(ref e) = result {
        if let Some(event) = exit_event(e) {
            event.emit();
        }
    }

    info!("chatwire headless mode exiting");
    result
}

async fn run_session(settings: &Settings, options: &HeadlessOptions) -> Result<()> {
    let client: DefaultChatClient = ChatClient::from_settings(settings)?;
    authenticate(&client, options).await?;

    let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    std::thread::spawn(move || {
        spawn_stdin_reader_blocking(command_tx);
    });

    drive(&client, &options.rooms, command_rx).await
}

/// The `error` event for a run that ended with `error`.
///
/// Sign-outs were already reported as `signed_out` while driving.
fn exit_event(error: &Error) -> Option<HeadlessEvent> {
    if error.signs_out() {
        return None;
    }
    Some(HeadlessEvent::error(error, error.is_fatal()))
}

/// Log in with the identifier and password, or resume with a token.
pub async fn authenticate<C, B>(client: &ChatClient<C, B>, options: &HeadlessOptions) -> Result<()>
where
    C: Connector + Send + Sync + 'static,
    B: HttpBackend + Send + Sync + 'static,
{
    if let Some(token) = &options.token {
        info!("Resuming with a supplied token");
        client.resume(Credential::new(token.clone()));
        return Ok(());
    }

    match (&options.identifier, &options.password) {
        (Some(identifier), Some(password)) => {
            let principal = client.login(identifier, password).await?;
            HeadlessEvent::logged_in(&principal.id, &principal.username).emit();
            Ok(())
        }
        _ => Err(Error::config("either --token or --identifier with a password is required")),
    }
}

/// Mirror session and store changes to stdout and apply `commands` until the
/// user quits or the credential is revoked.
pub async fn drive<C, B>(
    client: &ChatClient<C, B>,
    rooms: &[String],
    mut commands: mpsc::Receiver<Command>,
) -> Result<()>
where
    C: Connector + Send + Sync + 'static,
    B: HttpBackend + Send + Sync + 'static,
{
    let mut states = client.watch_state();
    let mut revisions = client.store().subscribe();
    let mut signed_out = client.signed_out();
    let mut stdin_open = true;

    for room_id in rooms {
        client.join_room(room_id);
    }
    HeadlessEvent::session_state(&states.borrow_and_update()).emit();

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = states.borrow_and_update().clone();
                HeadlessEvent::session_state(&snapshot).emit();
                if snapshot.state == SessionState::Failed {
                    let reason = snapshot
                        .last_error
                        .unwrap_or_else(|| "reconnect attempts exhausted".to_string());
                    return Err(Error::transport(reason));
                }
            }

            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
                let revision = *revisions.borrow_and_update();
                HeadlessEvent::store_changed(revision, client.store().snapshot()).emit();
            }

            reason = signed_out.recv() => match reason {
                Ok(reason) => {
                    HeadlessEvent::signed_out(&reason).emit();
                    return match reason {
                        SignOutReason::AuthRejected { reason } => Err(Error::auth_rejected(reason)),
                        SignOutReason::RefreshFailed { reason } => Err(Error::refresh_failed(reason)),
                        SignOutReason::UserRequested => Ok(()),
                    };
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },

            command = commands.recv(), if stdin_open => match command {
                Some(Command::Quit) => {
                    info!("Quit requested");
                    client.logout().await;
                    break;
                }
                Some(command) => handle_command(client, command).await,
                None => {
                    debug!("Command channel closed");
                    stdin_open = false;
                }
            },

            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, logging out");
                client.logout().await;
                break;
            }
        }
    }

    Ok(())
}

async fn handle_command<C, B>(client: &ChatClient<C, B>, command: Command)
where
    C: Connector + Send + Sync + 'static,
    B: HttpBackend + Send + Sync + 'static,
{
    let result = match command {
        Command::Join(room_id) => {
            client.join_room(&room_id);
            Ok(())
        }
        Command::Leave(room_id) => {
            client.leave_room(&room_id);
            Ok(())
        }
        Command::Typing(room_id) => {
            client.typing(&room_id);
            Ok(())
        }
        Command::Status(status) => {
            client.set_presence(status);
            Ok(())
        }
        Command::Rooms => client.load_rooms().await.map(|_| ()),
        Command::Say { room_id, text } => client.send_message(&room_id, &text),
        Command::Unknown(line) => {
            warn!("Unknown command: {}", line);
            Err(Error::config(format!("unknown command: {line}")))
        }
        Command::Quit => Ok(()),
    };

    match result {
        Ok(()) => {}
        // drive() reports the sign-out and ends the run
        Err(e) if e.signs_out() => debug!("Command ended in sign-out: {}", e),
        Err(e) => HeadlessEvent::error(&e, e.is_fatal()).emit(),
    }
}

/// Read commands from stdin on a blocking thread.
fn spawn_stdin_reader_blocking(command_tx: mpsc::Sender<Command>) {
    use std::io::BufRead;

    let stdin = std::io::stdin();
    let reader = stdin.lock();

    for line in reader.lines() {
        match line {
            Ok(line) => {
                let Some(command) = parse_command(&line) else {
                    continue;
                };
                let quit = command == Command::Quit;
                if command_tx.blocking_send(command).is_err() || quit {
                    break;
                }
            }
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        }
    }

    info!("Stdin reader exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_event_skips_sign_outs() {
        assert!(exit_event(&Error::refresh_failed("revoked")).is_none());
        assert!(exit_event(&Error::auth_rejected("bad token")).is_none());
    }

    #[test]
    fn test_exit_event_marks_invalid_config_fatal() {
        let event = exit_event(&Error::config_invalid("cap below base"));
        assert!(matches!(event, Some(HeadlessEvent::Error { fatal: true, .. })));

        let event = exit_event(&Error::transport("refused"));
        match event {
            Some(HeadlessEvent::Error { message, fatal, .. }) => {
                assert!(!fatal);
                assert!(message.contains("refused"));
            }
            other => panic!("expected an error event, got {other:?}"),
        }
    }
}
