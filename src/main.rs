use anyhow::Result;
use futures::StreamExt;
use std::io::Write;

use agent_stream::chat::{ChatCollector, ChatResponse, ChatStreamClient};
use agent_stream::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let config = Config::load()?;
    config.validate()?;

    // Logs go to stderr; stdout carries the reconstructed reply
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::debug!("Agent type: {}", config.agent_type);

    let client = ChatStreamClient::from_config(&config)?;
    let mut collector = ChatCollector::new().with_tool_observer(|snapshot| {
        for stream in &snapshot.streams {
            tracing::debug!(
                stream_key = %stream.stream_key,
                tool = ?stream.tool_name,
                streaming = stream.is_streaming,
                "Tool stream has {} chars",
                stream.text.len()
            );
        }
    });

    let stream = client.stream_chat(config.request());
    futures::pin_mut!(stream);

    let mut out = std::io::stdout();
    let mut printed = String::new();

    loop {
        let chunk = tokio::select! {
            chunk = stream.next() => chunk,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, closing chat stream");
                break;
            }
        };
        let Some(chunk) = chunk else {
            break;
        };

        collector.apply(&chunk);

        if config.json_output {
            writeln!(out, "{}", serde_json::to_string(&chunk)?)?;
        } else {
            print_new_text(&mut out, &mut printed, &collector.primary().text)?;
        }
    }

    let response = collector.finish();
    if !config.json_output {
        print_summary(&mut out, &printed, &response)?;
    }
    out.flush()?;

    if let Some(ref conversation_id) = response.conversation_id {
        tracing::info!("Conversation: {}", conversation_id);
    }

    if let Some(err) = response.error {
        anyhow::bail!("Chat stream failed: {}", err);
    }

    Ok(())
}

/// Print whatever the primary text gained since the last call.
///
/// Rewrites that are not appends (a refusal replacing a message, a reordered item) are
/// left for the summary.
fn print_new_text(out: &mut impl Write, printed: &mut String, text: &str) -> std::io::Result<()> {
    if let Some(suffix) = text.strip_prefix(printed.as_str()) {
        if !suffix.is_empty() {
            write!(out, "{}", suffix)?;
            out.flush()?;
            printed.push_str(suffix);
        }
    }
    Ok(())
}

fn print_summary(out: &mut impl Write, printed: &str, response: &ChatResponse) -> std::io::Result<()> {
    if response.text != printed {
        writeln!(out)?;
        writeln!(out, "{}", response.text)?;
    } else if !printed.is_empty() {
        writeln!(out)?;
    }

    for (i, citation) in response.citations.iter().enumerate() {
        writeln!(
            out,
            "  [{}] {}{}",
            i + 1,
            citation.title.as_deref().unwrap_or(""),
            citation
                .url
                .as_deref()
                .map(|u| format!(" <{}>", u))
                .unwrap_or_default()
        )?;
    }

    for tool in &response.tool_streams {
        writeln!(out)?;
        writeln!(
            out,
            "--- tool {} ({}){}",
            tool.tool_name.as_deref().unwrap_or("unknown"),
            tool.stream_key,
            if tool.is_streaming { " [incomplete]" } else { "" }
        )?;
        if !tool.text.is_empty() {
            writeln!(out, "{}", tool.text)?;
        }
    }

    Ok(())
}
