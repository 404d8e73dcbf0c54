//! `thinkloop extract`: stream stdin through the structured extractor.
//!
//! Every callback is printed as one JSON line:
//! `{"path": "steps[0].name", "value": "a", "complete": true}`.

use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use thinkloop_extractor::{ExtractError, FieldEvent, ParserOptions, StreamingJsonParser, format_path};
use tokio::io::{AsyncRead, AsyncReadExt};

const READ_BUFFER: usize = 4096;

pub async fn run(
    patterns: Vec<String>,
    realtime: bool,
    incremental: bool,
    strict: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let options = ParserOptions {
        realtime,
        incremental,
        lenient: !strict,
    };
    if incremental && !realtime {
        tracing::warn!("--incremental has no effect without --realtime");
    }

    extract(tokio::io::stdin(), &patterns, options, |line| println!("{line}")).await?;
    Ok(())
}

/// Feed `reader` to a parser with one callback per pattern, emitting each
/// callback as a JSON line after the chunk that produced it.
async fn extract<R>(
    mut reader: R,
    patterns: &[String],
    options: ParserOptions,
    mut emit: impl FnMut(&str),
) -> Result<Value, Box<dyn std::error::Error>>
where
    R: AsyncRead + Unpin,
{
    let pending = Arc::new(Mutex::new(Vec::new()));
    let mut parser = register(patterns, options, &pending)?;

    let mut buffer = vec![0u8; READ_BUFFER];
    loop {
        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        parser.feed_bytes(&buffer[..read])?;
        drain(&pending, &mut emit);
    }

    let root = parser.finish()?;
    drain(&pending, &mut emit);
    Ok(root)
}

fn register(
    patterns: &[String],
    options: ParserOptions,
    pending: &Arc<Mutex<Vec<String>>>,
) -> Result<StreamingJsonParser, ExtractError> {
    let mut parser = StreamingJsonParser::new(options);
    for pattern in patterns {
        let sink = Arc::clone(pending);
        parser.on(pattern, move |event| {
            if let Ok(mut lines) = sink.lock() {
                lines.push(line(event));
            }
        })?;
    }
    Ok(parser)
}

fn line(event: &FieldEvent<'_>) -> String {
    json!({
        "path": format_path(event.path),
        "value": event.value,
        "complete": event.complete,
    })
    .to_string()
}

fn drain(pending: &Mutex<Vec<String>>, emit: &mut impl FnMut(&str)) {
    if let Ok(mut lines) = pending.lock() {
        for line in lines.drain(..) {
            emit(&line);
        }
    }
}
