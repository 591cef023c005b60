// src/main.rs
// Interactive chatty client on top of the view-models
use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use log::info;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};

use chatty::backend::{
    AuthService, ContactsProvider, FileSettingsStore, InMemoryAuth, InMemoryContacts, InMemoryDocumentStore,
    InMemoryRealtimeStore, LocalCache, RealtimeStore, RedisRealtimeStore,
};
use chatty::client::models::RoomListState;
use chatty::client::services::{
    AggregatorOptions, AuthViewModel, ChatListViewModel, ContactsViewModel, ProfileViewModel, RoomAggregator,
};
use chatty::client::{ClientConfig, Database, RealtimeBackend};
use chatty::utils::logger::ChattyLogger;

#[derive(Parser, Debug)]
#[command(name = "chatty")]
#[command(about = "Terminal chat client")]
struct Args {
    /// Local cache URL (overrides CHATTY_DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,
    /// Use the Redis realtime store instead of the in-process one
    #[arg(long)]
    redis: bool,
    /// JSON file with the address book (overrides CONTACTS_PATH)
    #[arg(long)]
    contacts: Option<String>,
}

const HELP: &str = "\
/register <name> <birth_date> <phone> <email> <password>
/verify <email>                 mark an email as verified (in-process auth only)
/login <email> <password>
/phone <number>                 send an SMS code
/code <code>                    finish phone sign-in
/federated <id_token>
/rooms                          load and follow the room list
/new <receiver_phone>           create a chat room
/contacts
/profile
/logout
/quit";

fn print_rooms(state: &RoomListState) {
    if let Some(err) = &state.ui.error {
        println!("[ROOMS][ERROR] {}", err);
    }
    println!("[ROOMS] {} room(s)", state.rooms.len());
    for room in &state.rooms {
        let peer = room.receiver.name.as_deref().or(room.receiver.phone_number.as_deref()).unwrap_or("?");
        println!(
            "  {} with {}: {} ({})",
            room.room_id,
            peer,
            room.last_message.as_deref().unwrap_or("-"),
            room.updated_at.as_deref().unwrap_or("-")
        );
    }
}

fn report<T>(result: chatty::common::error::ChatResult<T>, ok: impl FnOnce(T)) {
    match result {
        Ok(value) => ok(value),
        Err(e) => println!("[ERROR] {}", e.user_message()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = ClientConfig::from_env();
    if let Some(url) = args.database_url {
        config.database_url = url;
    }
    if args.redis {
        config.realtime_backend = RealtimeBackend::Redis;
    }
    if args.contacts.is_some() {
        config.contacts_path = args.contacts;
    }
    ChattyLogger::init(&config.log_level)?;
    info!("Using local cache {}", config.database_url);

    let cache: Arc<dyn LocalCache> = Arc::new(Database::open(&config.database_url).await?);
    let realtime: Arc<dyn RealtimeStore> = match config.realtime_backend {
        RealtimeBackend::Redis => Arc::new(RedisRealtimeStore::connect(&config.redis_url).await?),
        RealtimeBackend::Memory => Arc::new(InMemoryRealtimeStore::new()),
    };
    let contacts: Arc<dyn ContactsProvider> = match &config.contacts_path {
        Some(path) => Arc::new(InMemoryContacts::from_json_file(path).await?),
        None => Arc::new(InMemoryContacts::new(Vec::new())),
    };
    let auth = InMemoryAuth::new();
    let documents = Arc::new(InMemoryDocumentStore::new());
    let settings = Arc::new(FileSettingsStore::open(&config.settings_path).await?);

    let auth_vm = AuthViewModel::new(
        Arc::new(auth.clone()),
        documents.clone(),
        cache.clone(),
        settings,
        &config,
    );
    let aggregator = Arc::new(RoomAggregator::new(
        realtime,
        documents,
        cache.clone(),
        AggregatorOptions { persist_incremental_updates: config.persist_incremental_updates },
    ));
    let chat_vm = ChatListViewModel::new(cache.clone(), aggregator);
    let profile_vm = ProfileViewModel::new(cache.clone());
    let contacts_vm = ContactsViewModel::new(contacts);

    let mut room_updates = chat_vm.subscribe();
    let printer = tokio::spawn(async move {
        while room_updates.changed().await.is_ok() {
            let state = room_updates.borrow_and_update().clone();
            if !state.ui.is_loading {
                print_rooms(&state);
            }
        }
    });

    println!("[CLIENT] chatty ready, /help lists the commands");
    let mut input = BufReader::new(stdin()).lines();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();
        let Some(line) = input.next_line().await? else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or("");
        let args: Vec<&str> = parts.collect();

        match (command, args.as_slice()) {
            ("/help", _) => println!("{}", HELP),
            ("/register", [name, birth_date, phone, email, password]) => {
                auth_vm.set_name(name).await;
                auth_vm.set_birth_date(birth_date).await;
                auth_vm.set_phone_number(phone).await;
                auth_vm.set_email(email).await;
                auth_vm.set_password(password).await;
                report(auth_vm.register().await, |_| {
                    println!("[AUTH] Registration successful, please verify your email")
                });
            }
            ("/verify", [email]) => {
                if auth.mark_email_verified(email).await {
                    println!("[AUTH] {} verified", email);
                } else {
                    println!("[ERROR] unknown account {}", email);
                }
            }
            ("/login", [email, password]) => {
                auth_vm.set_email(email).await;
                auth_vm.set_password(password).await;
                report(auth_vm.login().await, |_| println!("[AUTH] Login successful"));
            }
            ("/phone", [number]) => {
                auth_vm.set_phone_number(number).await;
                report(auth_vm.send_verification_code().await, |_| {
                    println!("[AUTH] code sent");
                });
                if let Some(id) = auth_vm.state().get().verification_id {
                    if let Some(code) = auth.pending_code(&id).await {
                        println!("[AUTH] (in-process SMS) your code is {}", code);
                    }
                }
            }
            ("/code", [code]) => {
                report(auth_vm.login_with_phone(Some(*code)).await, |_| println!("[AUTH] Login successful"));
            }
            ("/federated", [token]) => {
                report(auth_vm.login_with_federated(token).await, |_| println!("[AUTH] Login successful"));
            }
            ("/rooms", []) => {
                report(chat_vm.load_chat_rooms().await, |_| {});
                print_rooms(&chat_vm.subscribe().borrow());
            }
            ("/new", [receiver]) => {
                report(chat_vm.create_new_chat_room(receiver).await, |id| {
                    println!("[ROOMS] Chat room created: {}", id)
                });
            }
            ("/contacts", []) => {
                report(contacts_vm.load_contacts().await, |_| {
                    for contact in contacts_vm.contacts().get() {
                        println!("  {} {}", contact.name, contact.phone_number);
                    }
                });
            }
            ("/profile", []) => {
                report(profile_vm.load_user_data().await, |user| {
                    println!(
                        "  {} | {} | {}",
                        user.name.as_deref().unwrap_or("-"),
                        user.phone_number,
                        user.email.as_deref().unwrap_or("-")
                    );
                });
            }
            ("/logout", []) => {
                chat_vm.stop().await;
                report(auth_vm.logout().await, |_| println!("[AUTH] logged out"));
            }
            ("/quit", _) => break,
            _ => println!("[CLIENT] invalid command, try /help"),
        }
    }

    chat_vm.stop().await;
    printer.abort();
    if let Some(user) = auth.current_user().await {
        info!("Leaving while signed in as {}", user.uid);
    }
    Ok(())
}
