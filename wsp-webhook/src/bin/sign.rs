//! wsp-sign - Compute an `X-Hub-Signature-256` header for a payload.
//!
//! Reads the body from stdin (or the file given as the first argument) and
//! signs it with `APP_SECRET`, for replaying deliveries against a local
//! server:
//!
//! ```text
//! curl -H "X-Hub-Signature-256: $(wsp-sign body.json)" --data-binary @body.json ...
//! ```

use std::io::Read;

use anyhow::{bail, Context, Result};

use wsp::web::sign_hub_payload;

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let secret = std::env::var("APP_SECRET")
        .or_else(|_| std::env::var("WSP_APP_SECRET"))
        .context("APP_SECRET is not set")?;
    if secret.is_empty() {
        bail!("APP_SECRET is empty");
    }

    let body = match std::env::args().nth(1) {
        Some(path) => std::fs::read(&path).with_context(|| format!("Failed to read {}", path))?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("Failed to read stdin")?;
            buf
        }
    };

    println!("{}", sign_hub_payload(&secret, &body));
    Ok(())
}
