use anyhow::{Context, Result, anyhow, bail};
use console::style;

use super::CliFlags;
use crate::core::config::{PipelineConfig, SECRET_ENV, parse_kinds};
use crate::core::pipeline::trigger::Scope;
use crate::core::terminal::{GuideSection, print_error};
use crate::interfaces::web::auth::{SIGNATURE_HEADER, sign};

/// POST a signed trigger to a running daemon.
pub async fn run_trigger_command(flags: &CliFlags) -> Result<()> {
    let Some(raw_scope) = flags.positional.first() else {
        print_error("Usage: matchday trigger <scope> [--kinds preview,prediction] [--api-url URL]");
        return Ok(());
    };
    let scope = Scope::parse(raw_scope)?;
    parse_kinds(&flags.kinds)?;

    let config = PipelineConfig::load(flags.config.as_deref()).await?;
    let secret = config.trigger_secret().ok_or_else(|| {
        anyhow!(
            "No trigger secret configured. Set [trigger] secret or ${}",
            SECRET_ENV
        )
    })?;
    let api_url = flags
        .api_url
        .clone()
        .unwrap_or_else(|| format!("http://{}:{}", config.api.host, config.api.port));
    let url = format!("{}/api/trigger", api_url.trim_end_matches('/'));

    let body = serde_json::to_vec(&serde_json::json!({
        "scope": scope.to_string(),
        "kinds": flags.kinds,
    }))?;
    let signature =
        sign("POST", "/api/trigger", &body, secret).ok_or_else(|| anyhow!("Could not sign request"))?;

    let resp = reqwest::Client::new()
        .post(&url)
        .header("content-type", "application/json")
        .header(SIGNATURE_HEADER, signature)
        .body(body)
        .send()
        .await
        .with_context(|| format!("Could not reach the daemon at {}", api_url))?;
    let status = resp.status();
    let body = resp
        .json::<serde_json::Value>()
        .await
        .unwrap_or_else(|_| serde_json::json!({}));

    if !status.is_success() {
        let reason = body
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("no details");
        bail!("Trigger rejected ({}): {}", status, reason);
    }

    let count = |key: &str| body.get(key).and_then(|v| v.as_u64()).unwrap_or(0);
    GuideSection::new("Trigger Accepted")
        .status("Scope", &scope.to_string())
        .status("Fixtures", &count("matches").to_string())
        .status(
            "Jobs created",
            &format!("{}", style(count("jobs_created")).green().bold()),
        )
        .status(
            "Already queued",
            &count("jobs_planned")
                .saturating_sub(count("jobs_created"))
                .to_string(),
        )
        .print();
    println!();
    Ok(())
}
