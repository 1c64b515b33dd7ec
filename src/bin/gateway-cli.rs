use std::path::PathBuf;

use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, RequestBuilder};
use serde_json::{json, Value};

use route_gateway::security::signature::{decode_path, decode_query, sign, SigningInput};

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the route gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, default_value = "admin-secret-key")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway status
    Status,
    /// List registered predicates and filters
    Capabilities,
    /// Manage routes
    #[command(subcommand)]
    Routes(RouteCommands),
    /// Manage API clients
    #[command(subcommand)]
    Clients(ClientCommands),
    /// Print the auth headers for a request
    Sign {
        #[arg(long)]
        app_key: String,
        #[arg(long)]
        secret_key: String,
        #[arg(long, default_value = "GET")]
        method: String,
        /// Full request URL, e.g. http://localhost:8080/orders?id=1
        #[arg(long)]
        target: String,
        #[arg(long, default_value = "")]
        body: String,
    },
}

#[derive(Subcommand)]
enum RouteCommands {
    List {
        #[arg(short, long)]
        query: Option<String>,
    },
    Get { id: String },
    /// Create or update a route from a JSON file
    Save { file: PathBuf },
    Delete { id: String },
    /// Ask every instance to reload its route table
    Refresh,
    /// Rebuild the route cache from the durable store
    Reconcile,
}

#[derive(Subcommand)]
enum ClientCommands {
    List {
        #[arg(short, long)]
        query: Option<String>,
    },
    Create {
        #[arg(short, long)]
        description: Option<String>,
    },
    Delete { id: u64 },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let client = reqwest::Client::new();
    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );
    let admin = |method: Method, path: &str| {
        client
            .request(method, format!("{}/admin{}", cli.url, path))
            .headers(headers.clone())
    };

    let request = match cli.command {
        Commands::Status => admin(Method::GET, "/status"),
        Commands::Capabilities => admin(Method::GET, "/capabilities"),
        Commands::Routes(cmd) => match cmd {
            RouteCommands::List { query } => with_query(admin(Method::GET, "/routes"), query),
            RouteCommands::Get { id } => admin(Method::GET, &format!("/routes/{}", id)),
            RouteCommands::Save { file } => {
                let route: Value = serde_json::from_str(&std::fs::read_to_string(file)?)?;
                admin(Method::POST, "/routes").json(&route)
            }
            RouteCommands::Delete { id } => admin(Method::DELETE, &format!("/routes/{}", id)),
            RouteCommands::Refresh => admin(Method::POST, "/routes/refresh"),
            RouteCommands::Reconcile => admin(Method::POST, "/routes/reconcile"),
        },
        Commands::Clients(cmd) => match cmd {
            ClientCommands::List { query } => with_query(admin(Method::GET, "/clients"), query),
            ClientCommands::Create { description } => {
                admin(Method::POST, "/clients").json(&json!({ "description": description }))
            }
            ClientCommands::Delete { id } => admin(Method::DELETE, &format!("/clients/{}", id)),
        },
        Commands::Sign {
            app_key,
            secret_key,
            method,
            target,
            body,
        } => return print_signature(&app_key, &secret_key, &method, &target, &body),
    };

    print_response(request.send().await?).await
}

fn with_query(request: RequestBuilder, query: Option<String>) -> RequestBuilder {
    match query {
        Some(q) => request.query(&[("query", q)]),
        None => request,
    }
}

fn print_signature(
    app_key: &str,
    secret_key: &str,
    method: &str,
    target: &str,
    body: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let url = url::Url::parse(target)?;
    let host = match url.port() {
        Some(port) => format!("{}:{}", url.host_str().unwrap_or_default(), port),
        None => url.host_str().unwrap_or_default().to_string(),
    };
    let timestamp = chrono::Utc::now().timestamp().to_string();
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    let path = decode_path(url.path());
    let query = decode_query(url.query());

    let canonical = SigningInput {
        method: &method.to_uppercase(),
        host: &host,
        path: &path,
        query: &query,
        timestamp: &timestamp,
        nonce: &nonce,
        body: body.as_bytes(),
    }
    .canonical_string();

    println!("X-AppKey: {}", app_key);
    println!("X-Timestamp: {}", timestamp);
    println!("X-Nonce: {}", nonce);
    println!("X-Signature: {}", sign(secret_key, &canonical));
    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let text = res.text().await?;
    if text.is_empty() {
        println!("{}", status);
        return Ok(());
    }
    let json: Value = serde_json::from_str(&text)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
