//! Minimal compression loop: track usage, compress when over threshold.
//!
//! Builds a synthetic 40-turn session, runs it through a [`UsageTracker`]
//! with a small ceiling and compresses whenever the tracker asks for it.
//! Summaries come from an LLM when `OPENROUTER_KEY` is set, otherwise from
//! templates.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example compress_loop
//! OPENROUTER_KEY=sk-... cargo run --example compress_loop
//! ```

use cinch_memory::prelude::*;

#[tokio::main]
async fn main() -> Result<(), String> {
    // 1. An in-memory archive and an engine that logs nothing.
    let mut engine = CompressionEngine::new(Box::new(JsonArchiveStore::ephemeral()));
    if let Ok(key) = std::env::var("OPENROUTER_KEY") {
        let client = OpenRouterClient::new(key)?;
        engine = engine.with_summarizer(Box::new(LlmSummarizer::new(client)));
    }

    // 2. A tiny ceiling so compression kicks in quickly.
    let mut tracker = UsageTracker::new(4_000);
    let tools = vec![recall_tool_definition()];
    let config = CompressionConfig::new(1_500).with_min_recent_messages(6);

    // 3. Grow the transcript turn by turn.
    let mut transcript = vec![Message::system("You are a helpful coding assistant.")];
    for i in 0..20 {
        transcript.push(Message::user(format!(
            "Iteration {i}: tighten the parser in src/parse.rs around token class {i}."
        )));
        transcript.push(Message::assistant_text(format!(
            "Adjusted the match for token class {i} in src/parse.rs and reran the suite. {}",
            "The surrounding arms are unchanged. ".repeat(8)
        )));

        tracker.record_usage(&transcript, &tools);
        if tracker.needs_compression() {
            let outcome = engine
                .compress(&transcript, &config)
                .await
                .map_err(|e| e.to_string())?;
            println!("turn {i}: {}", outcome.notice());
            transcript = outcome.turns;
        }
    }

    // 4. Look something up in the archive.
    println!("\n--- {} ---", tracker.summary());
    match engine.retrieve("token class 3").await {
        Some(context) => println!("{context}"),
        None => println!("nothing archived about token class 3"),
    }
    Ok(())
}
