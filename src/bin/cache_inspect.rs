use chatty::backend::LocalCache;
use chatty::client::{ClientConfig, Database};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ClientConfig::from_env();
    let db_url = std::env::args().nth(1).unwrap_or(config.database_url);
    println!("Connecting to {}", db_url);
    let db = Database::open(&db_url).await?;

    println!("\n-- users --");
    match db.read_user().await? {
        Some(user) => println!(
            "uid={} name={} phone={} email={} created_at={}",
            user.uid,
            user.name.unwrap_or_default(),
            user.phone_number,
            user.email.unwrap_or_default(),
            user.created_at.unwrap_or_default()
        ),
        None => println!("(no signed-in user)"),
    }

    println!("\n-- chat_rooms --");
    for room in db.read_rooms().await? {
        println!(
            "id={} sender={} receiver={} last_message_len={} updated_at={}",
            room.room_id,
            room.sender.phone_number.unwrap_or_default(),
            room.receiver.phone_number.unwrap_or_default(),
            room.last_message.map(|m| m.len()).unwrap_or(0),
            room.updated_at.unwrap_or_default()
        );
    }

    Ok(())
}
