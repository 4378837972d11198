//! Drives one full battle against a running server: a teacher hosts, two
//! students join, the host starts and ends it, then the stats are read back.
use anyhow::{Context, Result, bail, ensure};
use clap::Parser;
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(long, default_value = "http://localhost:3001")]
    base_url: String,
}

struct Api {
    client: Client,
    base_url: String,
}

impl Api {
    async fn call(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Result<(StatusCode, Value)> {
        let mut request = self
            .client
            .request(method.clone(), format!("{}/api{path}", self.base_url));

        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("{method} {path} failed to send"))?;
        let status = response.status();
        let value = response.json().await.unwrap_or(Value::Null);

        Ok((status, value))
    }

    async fn expect(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Result<Value> {
        let (status, value) = self.call(method.clone(), path, token, body).await?;

        if !status.is_success() {
            bail!("{method} {path} returned {status}: {value}");
        }

        Ok(value["data"].clone())
    }

    /// Registers a throwaway account and returns its id and token.
    async fn register(&self, role: &str, suffix: &str) -> Result<(String, String)> {
        let email = format!("{}-{suffix}@tester.local", role.to_lowercase());
        let data = self
            .expect(
                Method::POST,
                "/auth/register",
                None,
                Some(json!({
                    "email": email,
                    "name": format!("Tester {role}"),
                    "password": "Tester123",
                    "role": role,
                })),
            )
            .await?;

        let id = data["user"]["id"].as_str().context("missing user id")?;
        let token = data["token"].as_str().context("missing token")?;

        Ok((id.to_string(), token.to_string()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let api = Api {
        client: Client::new(),
        base_url: args.base_url.trim_end_matches('/').to_string(),
    };

    let health = api.call(Method::GET, "/health", None, None).await?;
    println!("Health: {} {}", health.0, health.1);

    let suffix = std::process::id().to_string();
    let (_, host) = api.register("TEACHER", &suffix).await?;
    let (alice, alice_token) = api.register("STUDENT", &format!("a{suffix}")).await?;
    let (bob, bob_token) = api.register("STUDENT", &format!("b{suffix}")).await?;

    let created = api
        .expect(
            Method::POST,
            "/battles/create",
            Some(host.as_str()),
            Some(json!({ "name": "Tester battle", "maxPlayers": 2 })),
        )
        .await?;
    let id = created["battle"]["id"].as_str().context("missing battle id")?;
    let code = created["battle"]["code"].as_str().context("missing code")?;
    println!("Created battle {id} with code {code}, join at {}", created["joinUrl"]);

    let (status, _) = api
        .call(Method::PUT, &format!("/battles/{id}/start"), Some(host.as_str()), None)
        .await?;
    ensure!(status == StatusCode::BAD_REQUEST, "empty battle started: {status}");

    for token in [&alice_token, &bob_token] {
        api.expect(Method::POST, &format!("/battles/join/{code}"), Some(token.as_str()), None)
            .await?;
    }
    println!("Both students joined");

    let (status, body) = api
        .call(Method::POST, &format!("/battles/join/{code}"), Some(alice_token.as_str()), None)
        .await?;
    ensure!(status == StatusCode::BAD_REQUEST, "rejoin accepted: {status}");
    println!("Rejoin rejected: {}", body["error"]);

    api.expect(Method::PUT, &format!("/battles/{id}/start"), Some(host.as_str()), None)
        .await?;
    println!("Battle started");

    let ended = api
        .expect(
            Method::PUT,
            &format!("/battles/{id}/end"),
            Some(host.as_str()),
            Some(json!({
                "winnerId": alice,
                "results": [
                    { "userId": alice, "totalQuestions": 10, "correctAnswers": 9 },
                    { "userId": bob, "totalQuestions": 10, "correctAnswers": 4 },
                ],
            })),
        )
        .await?;
    println!("Battle ended, failed updates: {}", ended["failed"]);

    for (name, user, token) in [("Alice", &alice, &alice_token), ("Bob", &bob, &bob_token)] {
        let stats = api
            .expect(Method::GET, &format!("/users/{user}/stats"), Some(token.as_str()), None)
            .await?;
        println!("{name}: {}", stats["battleStats"]);
    }

    let (status, _) = api
        .call(Method::PUT, &format!("/battles/{id}/start"), Some(host.as_str()), None)
        .await?;
    ensure!(status == StatusCode::BAD_REQUEST, "finished battle restarted: {status}");

    println!("Round trip OK");

    Ok(())
}
