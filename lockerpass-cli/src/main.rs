use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lockerpass_core::auth::verification::{
    await_verification, VerificationOutcome, VERIFICATION_POLL_INTERVAL, VERIFICATION_TIMEOUT,
};
use lockerpass_core::auth::{request_password_reset, MemoryIdentityProvider};
use lockerpass_core::store::MemoryStore;
use lockerpass_core::{
    decrypt_for_display, Cipher, Config, ForgotPinFlow, HttpIdentityProvider, IdentityProvider,
    LockerPatch, LockerService, LockerStore, PinGate, PinService, PinStore, RemoteStore,
    SessionController, SessionEvent, SessionUser, SubscriptionEvent,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// LockerPass - a password locker over a hosted backend
#[derive(Parser)]
#[command(name = "lockerpass")]
#[command(about = "Password locker client", long_about = None)]
struct Cli {
    /// Path to the config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Run against in-memory backends (single-process demo mode)
    #[arg(long, global = true)]
    dev: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account and wait for email verification
    Signup {
        email: String,

        /// Display name for the account
        #[arg(long)]
        name: String,
    },

    /// Sign in and show session info
    Login { email: String },

    /// List lockers
    List {
        email: String,

        /// Show passwords in plain text
        #[arg(long)]
        show_passwords: bool,
    },

    /// Add a new locker
    Add {
        email: String,

        /// Display label for the locker
        #[arg(long)]
        name: String,

        /// Account identifier stored in the locker
        #[arg(long)]
        username: String,
    },

    /// Edit fields of a locker
    Edit {
        email: String,

        /// Locker id
        id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        username: Option<String>,

        /// Prompt for a new locker password
        #[arg(long)]
        password: bool,
    },

    /// Delete a locker
    Delete {
        email: String,

        /// Locker id
        id: String,
    },

    /// Follow the live locker feed until interrupted
    Watch { email: String },

    /// PIN management
    Pin {
        #[command(subcommand)]
        command: PinCommands,
    },

    /// Send a password-reset email
    ResetPassword { email: String },
}

#[derive(Subcommand)]
enum PinCommands {
    /// Change the PIN (requires the current PIN)
    Change { email: String },

    /// Recover a forgotten PIN (requires the account password)
    Forgot { email: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(Config::default_config_path);
    let config = Config::resolve(Some(&config_path))?;
    let cipher = Arc::new(config.cipher()?);

    if cli.dev {
        info!("running in dev mode (in-memory backends)");
        let identity = MemoryIdentityProvider::with_auto_verify();
        let store = MemoryStore::new();
        run_command(cli.command, identity, store, cipher).await
    } else {
        let identity = HttpIdentityProvider::new(&config.backend_url)?;
        let store = RemoteStore::new(
            &config.backend_url,
            Duration::from_secs(config.poll_interval_secs),
        )?;
        run_command(cli.command, identity, store, cipher).await
    }
}

async fn run_command<I, S>(command: Commands, identity: I, store: S, cipher: Arc<Cipher>) -> Result<()>
where
    I: IdentityProvider + 'static,
    S: LockerStore + PinStore + Clone + 'static,
{
    match command {
        Commands::Signup { email, name } => signup(&identity, &email, &name).await,

        Commands::Login { email } => {
            let (user, _) = sign_in_with_pin(&identity, &store, &cipher, &email).await?;
            println!("Signed in as {} <{}>", user.display_name, user.email);
            if let Some(last) = user.last_sign_in {
                println!("Last sign-in: {}", last.format("%Y-%m-%d %H:%M:%S UTC"));
            }
            Ok(())
        }

        Commands::List {
            email,
            show_passwords,
        } => {
            let (user, gate) = sign_in_with_pin(&identity, &store, &cipher, &email).await?;
            require_pin(&gate)?;

            let snapshot = first_snapshot(&store, &user.uid).await?;
            let view = decrypt_for_display(&cipher, snapshot);

            if view.is_empty() {
                println!("No lockers yet.");
            }
            for locker in view {
                if show_passwords {
                    println!("{}  {}  {}  {}", locker.id, locker.name, locker.username, locker.password);
                } else {
                    println!("{}  {}  {}", locker.id, locker.name, locker.username);
                }
            }
            Ok(())
        }

        Commands::Add {
            email,
            name,
            username,
        } => {
            if name.trim().is_empty() {
                bail!("locker name must not be empty");
            }
            if username.trim().is_empty() {
                bail!("username must not be empty");
            }

            let (user, gate) = sign_in_with_pin(&identity, &store, &cipher, &email).await?;
            require_pin(&gate)?;

            let password = rpassword::prompt_password("Locker password: ")?;
            let service = LockerService::new(store.clone(), cipher.clone());
            let id = service.create(&user.uid, &name, &username, &password).await?;
            println!("Created locker {}", id);
            Ok(())
        }

        Commands::Edit {
            email,
            id,
            name,
            username,
            password,
        } => {
            let (user, gate) = sign_in_with_pin(&identity, &store, &cipher, &email).await?;
            require_pin(&gate)?;

            let password = if password {
                Some(rpassword::prompt_password("New locker password: ")?)
            } else {
                None
            };

            let patch = LockerPatch {
                name,
                username,
                password,
            };
            if patch.is_empty() {
                bail!("nothing to change; pass --name, --username, or --password");
            }

            let service = LockerService::new(store.clone(), cipher.clone());
            service.update(&user.uid, &id, patch).await?;
            println!("Updated locker {}", id);
            Ok(())
        }

        Commands::Delete { email, id } => {
            let (user, gate) = sign_in_with_pin(&identity, &store, &cipher, &email).await?;
            require_pin(&gate)?;

            let answer = prompt_line(&format!("Delete locker {}? [y/N] ", id))?;
            if !answer.trim().eq_ignore_ascii_case("y") {
                println!("Cancelled.");
                return Ok(());
            }

            let service = LockerService::new(store.clone(), cipher.clone());
            service.delete(&user.uid, &id).await?;
            println!("Deleted locker {}", id);
            Ok(())
        }

        Commands::Watch { email } => {
            let (_, _) = sign_in_with_pin(&identity, &store, &cipher, &email).await?;
            watch(identity, store, cipher).await
        }

        Commands::Pin { command } => match command {
            PinCommands::Change { email } => {
                let (user, gate) = sign_in_with_pin(&identity, &store, &cipher, &email).await?;

                let current = rpassword::prompt_password("Current PIN: ")?;
                let new_pin = rpassword::prompt_password("New PIN: ")?;
                let confirm = rpassword::prompt_password("Confirm new PIN: ")?;

                let pins = PinService::new(store.clone(), cipher.clone());
                pins.change(&user.uid, &gate, &current, &new_pin, &confirm)
                    .await?;
                println!("PIN changed.");
                Ok(())
            }

            PinCommands::Forgot { email } => {
                let (user, _) = sign_in_with_pin(&identity, &store, &cipher, &email).await?;

                let mut flow = ForgotPinFlow::new();
                let password =
                    rpassword::prompt_password(format!("Verify your password for {}: ", email))?;
                flow.verify_password(&identity, &user, &password).await?;

                let new_pin = rpassword::prompt_password("New PIN: ")?;
                let confirm = rpassword::prompt_password("Confirm new PIN: ")?;

                let pins = PinService::new(store.clone(), cipher.clone());
                flow.save_new_pin(&pins, &user.uid, &new_pin, &confirm)
                    .await?;
                println!("PIN saved.");
                Ok(())
            }
        },

        Commands::ResetPassword { email } => {
            request_password_reset(&identity, &email).await?;
            println!("Password reset email sent! Please check your inbox.");
            Ok(())
        }
    }
}

async fn signup<I: IdentityProvider>(identity: &I, email: &str, name: &str) -> Result<()> {
    let password = rpassword::prompt_password("Password: ")?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;
    if password != confirm {
        bail!("passwords do not match");
    }

    let user = identity.sign_up(email, &password, name).await?;
    if user.email_verified {
        println!("Account created. You can now log in.");
        return Ok(());
    }

    println!("Verification link sent to {}", user.email);
    println!("Waiting for verification (Ctrl+C to stop waiting)...");

    tokio::select! {
        outcome = await_verification(identity, &user, VERIFICATION_POLL_INTERVAL, VERIFICATION_TIMEOUT) => {
            match outcome? {
                VerificationOutcome::Verified(_) => {
                    println!("Registration complete! You can now log in.");
                }
                VerificationOutcome::Expired => {
                    println!("Registration expired - please register again.");
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!("\nStopped waiting. The link stays valid until it expires.");
        }
    }
    Ok(())
}

/// Sign in, enforce the verified-email gate, and load the PIN gate.
/// A missing PIN record forces setup before anything else is reachable.
async fn sign_in_with_pin<I, S>(
    identity: &I,
    store: &S,
    cipher: &Arc<Cipher>,
    email: &str,
) -> Result<(SessionUser, PinGate)>
where
    I: IdentityProvider,
    S: LockerStore + PinStore + Clone,
{
    let password = rpassword::prompt_password("Password: ")?;
    let user = identity.sign_in(email, &password).await?;
    if !user.email_verified {
        bail!("email address has not been verified; complete signup first");
    }

    let pins = PinService::new(store.clone(), cipher.clone());
    let stored = match pins.load(&user.uid).await? {
        Some(stored) => stored,
        None => {
            println!("No PIN is set up for this account yet.");
            let pin = rpassword::prompt_password("Set your PIN: ")?;
            let confirm = rpassword::prompt_password("Confirm PIN: ")?;
            pins.setup(&user.uid, &pin, &confirm).await?
        }
    };

    Ok((user, PinGate::new(cipher.clone(), Some(stored))))
}

fn require_pin(gate: &PinGate) -> Result<()> {
    gate.require(
        || rpassword::prompt_password("Enter PIN: ").unwrap_or_default(),
        || (),
    )?;
    Ok(())
}

async fn first_snapshot<S: LockerStore>(
    store: &S,
    uid: &str,
) -> Result<Vec<lockerpass_core::Locker>> {
    let mut subscription = store.subscribe(uid).await?;
    match subscription.next_event().await {
        Some(SubscriptionEvent::Snapshot(snapshot)) => Ok(snapshot),
        Some(SubscriptionEvent::Error(e)) => Err(e.into()),
        None => bail!("subscription ended before the first snapshot"),
    }
}

async fn watch<I, S>(identity: I, store: S, cipher: Arc<Cipher>) -> Result<()>
where
    I: IdentityProvider + 'static,
    S: LockerStore + PinStore + 'static,
{
    let controller = SessionController::new(identity, store, cipher);
    let mut handle = controller.spawn();

    println!("Watching lockers (Ctrl+C to stop)...");
    loop {
        tokio::select! {
            event = handle.next_event() => match event {
                Some(SessionEvent::Lockers(view)) => {
                    println!("-- {} locker(s) --", view.len());
                    for locker in view {
                        println!("{}  {}  {}", locker.id, locker.name, locker.username);
                    }
                }
                Some(SessionEvent::Ready { user }) => {
                    println!("Session ready for {}", user.email);
                }
                Some(SessionEvent::PinSetupRequired { user }) => {
                    println!("No PIN set for {}; run `lockerpass login` to set one.", user.email);
                }
                Some(SessionEvent::SubscriptionError(e)) => {
                    eprintln!("subscription error: {}", e);
                }
                Some(SessionEvent::SignedOut) => {
                    println!("Signed out.");
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\nStopping.");
                break;
            }
        }
    }

    handle.shutdown();
    Ok(())
}

fn prompt_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    std::io::stdout().flush().context("flush stdout")?;
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("read stdin")?;
    Ok(line)
}
