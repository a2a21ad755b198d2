//! Two-turn conversation that relies on memory, then a structured reply.
//!
//! # Usage
//!
//! ```bash
//! OPENAI_API_KEY=sk-... cargo run --example memory_chat
//! ```

use std::sync::Arc;

use convo_rs::prelude::*;
use serde::Deserialize;

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct ActorFilms {
    actor: String,
    movies: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), ChatError> {
    // 1. Endpoint from OPENAI_API_KEY / OPENAI_BASE_URL / OPENAI_MODEL.
    let endpoint = Arc::new(OpenAiEndpoint::from_env()?);

    // 2. Client with a default system template and process-lifetime memory.
    let client = ChatClient::builder(endpoint)
        .default_system("You are a friendly chat bot that answers in the voice of a {voice}")
        .default_param("voice", "Wise Old Sage")
        .memory(Arc::new(InMemoryChatMemory::new()))
        .build();

    // 3. The second turn can only be answered from the first.
    client
        .prompt()
        .user("My name is andrew, and my job is software engineer")
        .conversation_id("andrew")
        .call()
        .await?;
    let mut stream = client
        .prompt()
        .user("Do you know my name and job?")
        .conversation_id("andrew")
        .stream()
        .await?;
    while let Some(chunk) = stream.next().await {
        print!("{}", chunk?.text);
    }
    println!();

    // 4. Structured output.
    let films: ActorFilms = client
        .prompt()
        .system("You are a film expert.")
        .user("Generate the filmography of 5 movies for Tom Hanks.")
        .entity()
        .await?;
    println!("{}: {}", films.actor, films.movies.join(", "));

    Ok(())
}
