use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing_subscriber::EnvFilter;

use leaflens::app::{open_token_store, AppContext, Services};
use leaflens::config::APP_NAME;
use leaflens::models::{ColorScheme, Message, RecordId, Report, ReportSource};
use leaflens::services::chat::{quick_question, QUICK_QUESTIONS};
use leaflens::services::{
    HistoryState, NewSessionOutcome, SendOutcome, SettingsService, SignupForm,
};

const HELP: &str = "\
Type a question to chat, or use a command:
  /new                    start a new chat
  /history                list previous chats
  /load <session id>      reopen a previous chat
  /delete <session id>    delete a previous chat
  /quick [n]              list quick questions, or send number n
  /login <user> <pass>    log in
  /signup                 create an account
  /logout                 log out
  /profile                show the logged-in user
  /diagnoses              list past leaf diagnoses
  /report <id>            show one diagnosis
  /predict <image path>   diagnose a leaf photo
  /theme                  toggle light and dark
  /scheme <mode>          use system, light or dark and save it
  /help                   show this help
  /quit                   exit";

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Say(&'a str),
    New,
    History,
    Load(&'a str),
    Delete(&'a str),
    Quick(Option<usize>),
    Login(&'a str, &'a str),
    Signup,
    Logout,
    Profile,
    Diagnoses,
    Report(&'a str),
    Predict(&'a str),
    Theme,
    Scheme(ColorScheme),
    Help,
    Quit,
    Invalid(&'static str),
}

fn parse_command(line: &str) -> Command<'_> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Say(line);
    };

    let (name, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let args = args.trim();
    let mut words = args.split_whitespace();

    match name {
        "new" => Command::New,
        "history" => Command::History,
        "load" if !args.is_empty() => Command::Load(args),
        "delete" if !args.is_empty() => Command::Delete(args),
        "quick" if args.is_empty() => Command::Quick(None),
        "quick" => match args.parse::<usize>() {
            Ok(n) if n > 0 => Command::Quick(Some(n)),
            _ => Command::Invalid("Usage: /quick [number]"),
        },
        "login" => match (words.next(), words.next()) {
            (Some(user), Some(password)) => Command::Login(user, password),
            _ => Command::Invalid("Usage: /login <user> <password>"),
        },
        "signup" => Command::Signup,
        "logout" => Command::Logout,
        "profile" => Command::Profile,
        "diagnoses" => Command::Diagnoses,
        "report" if !args.is_empty() => Command::Report(args),
        "predict" if !args.is_empty() => Command::Predict(args),
        "theme" => Command::Theme,
        "scheme" => match args {
            "system" => Command::Scheme(ColorScheme::System),
            "light" => Command::Scheme(ColorScheme::Light),
            "dark" => Command::Scheme(ColorScheme::Dark),
            _ => Command::Invalid("Usage: /scheme <system|light|dark>"),
        },
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        "load" | "delete" => Command::Invalid("This command needs a session id"),
        "report" => Command::Invalid("Usage: /report <id>"),
        "predict" => Command::Invalid("Usage: /predict <image path>"),
        _ => Command::Invalid("Unknown command, try /help"),
    }
}

fn parse_record_id(raw: &str) -> RecordId {
    raw.parse::<i64>()
        .map(RecordId::from)
        .unwrap_or_else(|_| RecordId::from(raw))
}

fn print_message(message: &Message) {
    println!("{}: {}", message.sender().display_name(), message.text());
}

fn print_report(report: &Report) {
    println!("Crop:       {}", report.diagnosis.crop);
    println!("Disease:    {}", report.diagnosis.disease);
    if let Some(confidence) = report.confidence {
        println!("Confidence: {:.1}%", confidence * 100.0);
    }
    if let Some(created_at) = report.created_at {
        println!("Date:       {}", created_at.format("%Y-%m-%d %H:%M"));
    }
    if let Some(url) = &report.image_url {
        println!("Image:      {}", url);
    }
}

struct Cli {
    ctx: AppContext,
    settings_path: Option<PathBuf>,
    services: Services,
    input: Lines<BufReader<Stdin>>,
}

impl Cli {
    async fn run(&mut self) -> Result<()> {
        println!("{} ({})", APP_NAME, self.services.client.base_url());
        if !self.services.auth.is_authenticated().await {
            println!("Not logged in. Use /login <user> <password> or /signup.");
        }
        println!("Type /help for commands.");

        while let Some(line) = self.next_line().await? {
            match parse_command(&line) {
                Command::Say("") => {}
                Command::Say(text) => self.send(text).await,
                Command::New => self.new_chat().await?,
                Command::History => self.history().await,
                Command::Load(id) => self.load(id).await,
                Command::Delete(id) => self.delete(id).await,
                Command::Quick(None) => {
                    for (i, question) in QUICK_QUESTIONS.iter().enumerate() {
                        println!("  {}. {}", i + 1, question);
                    }
                }
                Command::Quick(Some(n)) => match quick_question(n - 1) {
                    Some(question) => {
                        println!("You: {}", question);
                        self.send(question).await;
                    }
                    None => println!("There is no quick question {}", n),
                },
                Command::Login(user, password) => self.login(user, password).await,
                Command::Signup => self.signup().await?,
                Command::Logout => match self.services.auth.logout().await {
                    Ok(()) => println!("Logged out."),
                    Err(e) => println!("Logout failed: {:#}", e),
                },
                Command::Profile => match self.services.auth.profile().await {
                    Ok(profile) => {
                        println!("{} ({})", profile.full_name(), profile.username);
                        println!("{}", profile.email);
                    }
                    Err(e) => println!("Could not load profile: {:#}", e),
                },
                Command::Diagnoses => self.diagnoses().await,
                Command::Report(id) => {
                    self.report(ReportSource::HistoricalById(parse_record_id(id)))
                        .await
                }
                Command::Predict(path) => self.predict(Path::new(path)).await,
                Command::Theme => {
                    self.ctx.toggle_theme();
                    println!("Theme: {:?}", self.ctx.theme.mode);
                }
                Command::Scheme(scheme) => self.set_scheme(scheme),
                Command::Help => println!("{}", HELP),
                Command::Quit => break,
                Command::Invalid(usage) => println!("{}", usage),
            }
        }

        self.services.chat.close();
        Ok(())
    }

    fn set_scheme(&mut self, scheme: ColorScheme) {
        self.ctx.set_color_scheme(scheme);
        println!("Theme: {:?}", self.ctx.theme.mode);
        if let Some(path) = &self.settings_path {
            if let Err(e) = SettingsService::save(path, &self.ctx.settings) {
                tracing::error!("Failed to save settings: {:#}", e);
            }
        }
    }

    async fn next_line(&mut self) -> Result<Option<String>> {
        self.input.next_line().await.context("Failed to read input")
    }

    async fn prompt(&mut self, label: &str) -> Result<String> {
        print!("{}", label);
        std::io::stdout().flush().context("Failed to flush stdout")?;
        Ok(self.next_line().await?.unwrap_or_default())
    }

    async fn send(&self, text: &str) {
        match self.services.chat.send_message(text).await {
            SendOutcome::Replied(reply) => print_message(&reply),
            SendOutcome::Failed { reply, error } => {
                tracing::debug!("Send failed: {}", error);
                print_message(&reply);
            }
            SendOutcome::Ignored | SendOutcome::Abandoned => {}
        }
    }

    async fn new_chat(&mut self) -> Result<()> {
        match self.services.chat.start_new_session(false) {
            NewSessionOutcome::Cleared => println!("Started a new chat."),
            NewSessionOutcome::Busy => println!("Wait for the current request to finish."),
            NewSessionOutcome::NeedsConfirmation => {
                let answer = self
                    .prompt("Start a new chat? The current conversation will be cleared. [y/N] ")
                    .await?;
                if matches!(answer.trim(), "y" | "Y" | "yes") {
                    self.services.chat.start_new_session(true);
                    println!("Started a new chat.");
                }
            }
        }
        Ok(())
    }

    async fn history(&self) {
        match self.services.chat.load_history_list().await {
            HistoryState::Empty => println!("No previous chats."),
            HistoryState::Loaded(summaries) => {
                for summary in summaries {
                    println!(
                        "  {}  {} ({} messages)",
                        summary.session_id, summary.preview, summary.message_count
                    );
                }
            }
            HistoryState::Failed(e) => println!("Could not load chats: {}. Try /history again.", e),
            HistoryState::NotLoaded | HistoryState::Loading => {}
        }
    }

    async fn load(&self, session_id: &str) {
        match self.services.chat.load_session(session_id).await {
            Ok(()) => {
                for message in self.services.chat.snapshot().messages {
                    print_message(&message);
                }
            }
            Err(e) => println!("Could not open chat: {}", e),
        }
    }

    async fn delete(&self, session_id: &str) {
        match self.services.chat.delete_session(session_id).await {
            Ok(()) => println!("Deleted {}.", session_id),
            Err(e) => println!("Could not delete chat: {}", e),
        }
    }

    async fn login(&self, user: &str, password: &str) {
        match self.services.auth.login(user, password).await {
            Ok(session) if session.email.is_empty() => println!("Logged in."),
            Ok(session) => println!("Logged in as {}.", session.email),
            Err(e) => println!("Login failed: {:#}", e),
        }
    }

    async fn signup(&mut self) -> Result<()> {
        let form = SignupForm {
            first_name: self.prompt("First name: ").await?,
            middle_name: self.prompt("Middle name (optional): ").await?,
            last_name: self.prompt("Last name: ").await?,
            email: self.prompt("Email: ").await?,
            username: self.prompt("Username: ").await?,
            password: self.prompt("Password: ").await?,
            confirm_password: self.prompt("Confirm password: ").await?,
        };
        match self.services.auth.register(form).await {
            Ok(()) => println!("Account created. Log in with /login."),
            Err(e) => println!("Signup failed:\n{:#}", e),
        }
        Ok(())
    }

    async fn diagnoses(&self) {
        match self.services.reports.history().await {
            Ok(records) if records.is_empty() => println!("No diagnoses yet."),
            Ok(records) => {
                for record in records {
                    let id = record.id.as_ref().map(ToString::to_string).unwrap_or_default();
                    let date = record
                        .created_at()
                        .map(|t| t.format("%Y-%m-%d").to_string())
                        .unwrap_or_default();
                    println!("  {:>6}  {:10}  {}", id, date, record.prediction);
                }
            }
            Err(e) => println!("Could not load diagnoses: {}", e),
        }
    }

    async fn report(&self, source: ReportSource) {
        match self.services.reports.resolve(source).await {
            Ok(report) => print_report(&report),
            Err(e) => println!("Could not load report: {}", e),
        }
    }

    async fn predict(&self, path: &Path) {
        let data = match tokio::fs::read(path).await {
            Ok(data) => Bytes::from(data),
            Err(e) => {
                println!("Could not read {}: {}", path.display(), e);
                return;
            }
        };
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "leaf.jpg".to_string());

        match self.services.reports.predict(data, &filename).await {
            Ok(source) => self.report(source).await,
            Err(e) => println!("Diagnosis failed: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let settings_path = std::env::args_os().nth(1).map(PathBuf::from);
    let settings = SettingsService::load(settings_path.as_deref());
    let ctx = AppContext::new(settings, false);

    let tokens = open_token_store().await;
    let services = Services::new(&ctx.settings, tokens)?;

    let mut cli = Cli {
        ctx,
        settings_path,
        services,
        input: BufReader::new(tokio::io::stdin()).lines(),
    };
    cli.run().await
}
