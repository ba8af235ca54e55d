//! Subcommands and their execution.

use anyhow::{anyhow, bail, Context};
use authentic_client::{
    AuthResponse, AuthenticClient, ChangePassword, ChangePasswordRequest, ConfirmRequest,
    LoginRequest, RequestOptions, Response, SignupRequest,
};
use clap::Subcommand;
use reqwest::header::{HeaderName, HeaderValue};
use serde_json::{json, Map, Value};

/// Operations the CLI can perform.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create an account; the server emails a confirmation link.
    Signup {
        /// Page the confirmation link points at.
        #[arg(long)]
        confirm_url: String,
    },

    /// Confirm an account with the token from the confirmation email.
    Confirm {
        /// Token from the confirmation email.
        #[arg(long)]
        confirm_token: String,
    },

    /// Log in with email and password.
    Login,

    /// Ask for a password change link.
    ChangePasswordRequest {
        /// Page the change link points at.
        #[arg(long)]
        change_url: String,
    },

    /// Set a new password with the token from the change email.
    ChangePassword {
        /// Token from the change email.
        #[arg(long)]
        change_token: String,

        /// The new password.
        #[arg(long, env = "AUTHENTIC_NEW_PASSWORD", hide_env_values = true)]
        new_password: String,
    },

    /// Verify the session token and print its claims.
    Verify,

    /// Authenticated GET.
    Get(RequestArgs),

    /// Authenticated POST.
    Post(BodyRequestArgs),

    /// Authenticated PUT.
    Put(BodyRequestArgs),

    /// Authenticated DELETE.
    Delete(RequestArgs),
}

/// Target and extra headers of a request.
#[derive(clap::Args, Debug)]
pub struct RequestArgs {
    /// Absolute URL, or `/path` when `--origin` is set.
    url: String,

    /// Extra header as `Name: value`; repeatable.
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
}

/// A request that carries a JSON body.
#[derive(clap::Args, Debug)]
pub struct BodyRequestArgs {
    #[command(flatten)]
    request: RequestArgs,

    /// JSON body.
    #[arg(short, long, default_value = "{}")]
    data: String,
}

/// Run `command` and print its result to stdout.
///
/// # Errors
///
/// Returns an error if arguments are missing or invalid, or the call fails.
pub async fn run(client: &AuthenticClient, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Signup { confirm_url } => {
            let (email, password) = credentials(client)?;
            let resp = client
                .signup(&SignupRequest {
                    email,
                    password,
                    confirm_url,
                    extra: Map::new(),
                })
                .await?;
            print_auth(&resp)
        }
        Command::Confirm { confirm_token } => {
            let resp = client
                .confirm(&ConfirmRequest {
                    email: email(client)?,
                    confirm_token,
                })
                .await?;
            print_auth(&resp)
        }
        Command::Login => {
            let (email, password) = credentials(client)?;
            let resp = client.login(&LoginRequest { email, password }).await?;
            print_auth(&resp)
        }
        Command::ChangePasswordRequest { change_url } => {
            let resp = client
                .change_password_request(&ChangePasswordRequest {
                    email: email(client)?,
                    change_url,
                    extra: Map::new(),
                })
                .await?;
            print_auth(&resp)
        }
        Command::ChangePassword {
            change_token,
            new_password,
        } => {
            let resp = client
                .change_password(&ChangePassword {
                    email: email(client)?,
                    password: new_password,
                    change_token,
                })
                .await?;
            print_auth(&resp)
        }
        Command::Verify => {
            let claims = client.verify_token().await?;
            let expires_at = claims.expires_at().map(|at| at.to_rfc3339());
            print_json(&json!({
                "expiresAt": expires_at,
                "claims": claims,
            }))
        }
        Command::Get(args) => {
            let options = request_options(&args.headers)?;
            let resp = client.get(&args.url, options).await?;
            print_response(&resp)
        }
        Command::Post(args) => {
            let options = request_options(&args.request.headers)?;
            let body = parse_body(&args.data)?;
            let resp = client.post(&args.request.url, &body, options).await?;
            print_response(&resp)
        }
        Command::Put(args) => {
            let options = request_options(&args.request.headers)?;
            let body = parse_body(&args.data)?;
            let resp = client.put(&args.request.url, &body, options).await?;
            print_response(&resp)
        }
        Command::Delete(args) => {
            let options = request_options(&args.headers)?;
            let resp = client.delete(&args.url, options).await?;
            print_response(&resp)
        }
    }
}

fn email(client: &AuthenticClient) -> anyhow::Result<String> {
    client
        .email()
        .ok_or_else(|| anyhow!("--email (or AUTHENTIC_EMAIL) is required"))
}

fn credentials(client: &AuthenticClient) -> anyhow::Result<(String, String)> {
    let email = email(client)?;
    let password = client
        .config()
        .password
        .clone()
        .ok_or_else(|| anyhow!("--password (or AUTHENTIC_PASSWORD) is required"))?;
    Ok((email, password))
}

/// Build request options from `Name: value` header strings.
fn request_options(headers: &[String]) -> anyhow::Result<RequestOptions> {
    headers.iter().try_fold(RequestOptions::default(), |options, raw| {
        let (name, value) = parse_header(raw)?;
        Ok(options.with_header(name, value))
    })
}

fn parse_header(raw: &str) -> anyhow::Result<(HeaderName, HeaderValue)> {
    let Some((name, value)) = raw.split_once(':') else {
        bail!("header must look like `Name: value`, got {raw:?}");
    };
    let name = HeaderName::from_bytes(name.trim().as_bytes())
        .with_context(|| format!("invalid header name in {raw:?}"))?;
    let value = HeaderValue::from_str(value.trim())
        .with_context(|| format!("invalid header value in {raw:?}"))?;
    Ok((name, value))
}

fn parse_body(data: &str) -> anyhow::Result<Value> {
    serde_json::from_str(data).context("--data must be JSON")
}

fn print_auth(resp: &AuthResponse) -> anyhow::Result<()> {
    print_json(&serde_json::to_value(resp)?)
}

fn print_response(resp: &Response) -> anyhow::Result<()> {
    tracing::debug!(status = resp.status, "Request completed");
    print_json(&resp.body)
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
