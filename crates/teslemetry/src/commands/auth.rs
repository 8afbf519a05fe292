//! Auth subcommand handlers: the PKCE login flow and token housekeeping.

use chrono::{DateTime, Utc};
use dialoguer::Input;
use owo_colors::OwoColorize;
use serde::Serialize;
use url::Url;
use uuid::Uuid;

use teslemetry_core::TokenManager;

use crate::cli::{AuthArgs, AuthCommand, GlobalOpts};
use crate::error::{CliError, prompt_err};
use crate::output;

use super::token_manager;

pub async fn handle(args: AuthArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (_, tokens) = token_manager(global).await?;
    match args.command {
        AuthCommand::Login => login(&tokens, global).await,
        AuthCommand::Status => {
            let status = AuthStatus::of(&tokens);
            let color = output::should_color(&global.color);
            let out = output::render_single(
                &global.output,
                &status,
                |s| s.detail(color),
                |s| s.authorized.to_string(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }
        AuthCommand::Refresh => {
            let token = tokens.refresh_token().await?;
            if !global.quiet {
                eprintln!("Token refreshed, valid until {}", token.expires_at);
            }
            Ok(())
        }
        AuthCommand::Logout => {
            tokens.clear_token().await?;
            if !global.quiet {
                eprintln!("Stored token removed");
            }
            Ok(())
        }
    }
}

// ── Login ────────────────────────────────────────────────────────────

async fn login(tokens: &TokenManager, global: &GlobalOpts) -> Result<(), CliError> {
    let pkce = tokens.generate_pkce();
    let state = Uuid::new_v4().to_string();
    let url = tokens.authorization_url(&state, &pkce.code_challenge);

    eprintln!("Open this URL in a browser and approve access:\n\n  {url}\n");
    let input: String = Input::new()
        .with_prompt("Authorization code or redirect URL")
        .interact_text()
        .map_err(prompt_err)?;

    let code = extract_code(&input, &state)?;
    let token = tokens.exchange_code(&code, &pkce.code_verifier).await?;

    if !global.quiet {
        let msg = format!("Authorized, token valid until {}", token.expires_at);
        if output::should_color(&global.color) {
            eprintln!("{}", msg.green());
        } else {
            eprintln!("{msg}");
        }
    }
    Ok(())
}

/// Accept either a bare code or the full redirect URL. A redirect URL must
/// carry the `state` this attempt generated.
fn extract_code(input: &str, expected_state: &str) -> Result<String, CliError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::Validation {
            field: "code".into(),
            reason: "must not be empty".into(),
        });
    }

    let Ok(redirect) = Url::parse(input) else {
        return Ok(input.to_owned());
    };

    let param = |name: &str| {
        redirect
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    };

    if let Some(error) = param("error") {
        return Err(CliError::AuthFailed {
            description: param("error_description").unwrap_or_default(),
            code: error,
        });
    }
    if param("state").as_deref() != Some(expected_state) {
        return Err(CliError::StateMismatch);
    }
    param("code").ok_or_else(|| CliError::Validation {
        field: "code".into(),
        reason: "redirect URL has no `code` parameter".into(),
    })
}

// ── Status ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct AuthStatus {
    authorized: bool,
    valid: bool,
    refreshable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

impl AuthStatus {
    fn of(tokens: &TokenManager) -> Self {
        let token = tokens.current_token();
        Self {
            authorized: token.is_some(),
            valid: tokens.has_valid_token(),
            refreshable: token.as_ref().is_some_and(|t| t.refresh_token.is_some()),
            expires_at: token.map(|t| t.expires_at),
        }
    }

    fn detail(&self, color: bool) -> String {
        if !self.authorized {
            return "Not authorized. Run: teslemetry auth login".into();
        }
        let state = match (self.valid, color) {
            (true, true) => "valid".green().to_string(),
            (false, true) => "expired".red().to_string(),
            (true, false) => "valid".into(),
            (false, false) => "expired".into(),
        };
        let mut out = format!("Token:       {state}");
        if let Some(at) = self.expires_at {
            out.push_str(&format!("\nExpires at:  {at}"));
        }
        out.push_str(&format!(
            "\nRefreshable: {}",
            if self.refreshable { "yes" } else { "no" }
        ));
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn bare_code_is_taken_as_is() {
        assert_eq!(extract_code("  abc123 \n", "s1").unwrap(), "abc123");
    }

    #[test]
    fn redirect_url_with_matching_state_yields_code() {
        let url = "https://callback.athom.com/oauth2/callback?code=xyz&state=s1";
        assert_eq!(extract_code(url, "s1").unwrap(), "xyz");
    }

    #[test]
    fn redirect_url_with_foreign_state_is_refused() {
        let url = "https://callback.athom.com/oauth2/callback?code=xyz&state=other";
        assert!(matches!(
            extract_code(url, "s1").unwrap_err(),
            CliError::StateMismatch
        ));
    }

    #[test]
    fn redirect_error_is_reported() {
        let url = "https://callback.athom.com/oauth2/callback?error=access_denied&error_description=nope&state=s1";
        let err = extract_code(url, "s1").unwrap_err();
        assert!(matches!(err, CliError::AuthFailed { ref code, .. } if code == "access_denied"));
    }

    #[test]
    fn empty_input_is_a_validation_error() {
        assert!(matches!(
            extract_code("   ", "s1").unwrap_err(),
            CliError::Validation { .. }
        ));
    }
}
