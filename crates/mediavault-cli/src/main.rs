// MediaVault CLI - Operator tool for the media asset service

mod api;
mod claims;
mod keys;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use api::{parse_owner, ApiClient};

/// MediaVault - media asset lifecycle tool
#[derive(Parser)]
#[command(name = "mediavault")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server base URL
    #[arg(long, env = "MEDIAVAULT_SERVER", default_value = "http://localhost:3000", global = true)]
    server: String,

    /// Bearer service token
    #[arg(long, env = "MEDIAVAULT_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage assets (create, list, archive, delete, owners, playback)
    Assets {
        #[command(subcommand)]
        action: AssetAction,
    },
    /// Operator maintenance (reconcile, mirror)
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },
    /// Playback signing keys
    Keys {
        #[command(subcommand)]
        action: KeyAction,
    },
    /// Provider webhook helpers
    Webhook {
        #[command(subcommand)]
        action: WebhookAction,
    },
}

#[derive(Subcommand)]
enum AssetAction {
    /// Request an upload target and create a pending asset
    Create {
        /// Media kind (video or image)
        #[arg(short, long, default_value = "video")]
        kind: String,

        /// Initial owner as type:id
        #[arg(short, long)]
        owner: Option<String>,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// Opaque value echoed back by the provider
        #[arg(long)]
        passthrough: Option<String>,
    },
    /// Show one asset with its metadata
    Get {
        id: Uuid,

        /// Also find soft-deleted assets
        #[arg(long)]
        include_deleted: bool,
    },
    /// List assets, newest first
    List {
        /// active, deleted or all
        #[arg(long)]
        scope: Option<String>,

        /// Only assets without an owner
        #[arg(long)]
        unowned: bool,

        #[arg(long)]
        kind: Option<String>,

        #[arg(long)]
        state: Option<String>,

        #[arg(long)]
        limit: Option<i64>,

        #[arg(long)]
        offset: Option<i64>,
    },
    /// Edit title, description or passthrough
    Metadata {
        id: Uuid,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        passthrough: Option<String>,

        /// Remove the description
        #[arg(long, conflicts_with = "description")]
        clear_description: bool,
    },
    /// Hide a ready asset from playback
    Archive { id: Uuid },
    /// Return an archived asset to ready
    Unarchive { id: Uuid },
    /// Soft-delete an asset and release its owner
    Delete { id: Uuid },
    /// Clear the soft-delete marker
    Restore { id: Uuid },
    /// Permanently delete a soft-deleted asset, remote copy included
    Purge {
        id: Uuid,

        /// Skip the confirmation requirement
        #[arg(long)]
        yes: bool,
    },
    /// Bind an owner (type:id) to an unowned asset
    Associate { id: Uuid, owner: String },
    /// Unbind an owner (type:id)
    Deassociate { id: Uuid, owner: String },
    /// Replace the owner set (zero or one owner)
    SetOwners {
        id: Uuid,

        /// Owners as type:id; none clears ownership
        owners: Vec<String>,
    },
    /// Mint a playback credential for a ready asset
    Playback {
        id: Uuid,

        #[arg(long)]
        viewer: Option<String>,

        /// Credential lifetime in seconds
        #[arg(long, default_value_t = 3600)]
        ttl: u64,

        /// Extra claims as key=value (can be specified multiple times)
        #[arg(short, long = "claim", value_name = "KEY=VALUE")]
        claims: Vec<String>,
    },
}

#[derive(Subcommand)]
enum AdminAction {
    /// Run one reconciliation sweep now
    Reconcile,
    /// Show queued metadata repairs
    Mirror,
    /// Check server health
    Health,
}

#[derive(Subcommand)]
enum KeyAction {
    /// Generate a playback signing key
    Generate {
        /// Write the key to this file instead of printing it
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Overwrite an existing key file
        #[arg(short, long)]
        force: bool,
    },
    /// Show the key id and public key of a key file
    Show { path: PathBuf },
}

#[derive(Subcommand)]
enum WebhookAction {
    /// Sign a webhook body as the provider would
    Sign {
        /// File holding the JSON body
        body: PathBuf,

        /// Shared webhook secret
        #[arg(long, env = "MEDIAVAULT_WEBHOOK_SECRET", hide_env_values = true)]
        secret: String,

        /// Unix timestamp to sign (defaults to now)
        #[arg(long)]
        timestamp: Option<i64>,

        /// Deliver the signed body to the server
        #[arg(long)]
        send: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    let client = ApiClient::new(&cli.server, cli.token);

    let result = match cli.command {
        Commands::Assets { action } => handle_assets(&client, action),
        Commands::Admin { action } => handle_admin(&client, action),
        Commands::Keys { action } => handle_keys(action),
        Commands::Webhook { action } => handle_webhook(&client, action),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}

fn asset_path(id: Uuid, suffix: &str) -> String {
    format!("/assets/{}{}", id, suffix)
}

fn handle_assets(client: &ApiClient, action: AssetAction) -> anyhow::Result<()> {
    match action {
        AssetAction::Create {
            kind,
            owner,
            title,
            description,
            passthrough,
        } => {
            let owner = owner.as_deref().map(parse_owner).transpose()?;
            let body = json!({
                "kind": kind,
                "owner": owner,
                "title": title,
                "description": description,
                "passthrough": passthrough,
            });
            let created = client.post("/assets/uploads", Some(&body))?;
            println!("{} Upload target issued", "✓".green().bold());
            println!();
            println!("  Asset:  {}", created["asset"]["id"].as_str().unwrap_or("?"));
            println!("  Upload: {}", created["upload"]["url"].as_str().unwrap_or("?"));
            Ok(())
        }
        AssetAction::Get { id, include_deleted } => {
            let query = if include_deleted {
                vec![("include_deleted", "true".to_string())]
            } else {
                Vec::new()
            };
            print_json(&client.get(&asset_path(id, ""), &query)?)
        }
        AssetAction::List {
            scope,
            unowned,
            kind,
            state,
            limit,
            offset,
        } => {
            let mut query = Vec::new();
            push_param(&mut query, "scope", scope);
            push_param(&mut query, "kind", kind);
            push_param(&mut query, "state", state);
            push_param(&mut query, "limit", limit);
            push_param(&mut query, "offset", offset);
            if unowned {
                query.push(("unowned", "true".to_string()));
            }
            let listed = client.get("/assets", &query)?;
            print_asset_table(&listed);
            Ok(())
        }
        AssetAction::Metadata {
            id,
            title,
            description,
            passthrough,
            clear_description,
        } => {
            let mut patch = Map::new();
            if let Some(title) = title {
                patch.insert("title".to_string(), Value::String(title));
            }
            if let Some(description) = description {
                patch.insert("description".to_string(), Value::String(description));
            }
            if clear_description {
                patch.insert("description".to_string(), Value::Null);
            }
            if let Some(passthrough) = passthrough {
                patch.insert("passthrough".to_string(), Value::String(passthrough));
            }
            if patch.is_empty() {
                return Err(anyhow::anyhow!(
                    "Nothing to update. Pass --title, --description or --passthrough."
                ));
            }
            print_json(&client.patch(&asset_path(id, "/metadata"), &Value::Object(patch))?)
        }
        AssetAction::Archive { id } => transition(client, id, "/archive", "archived"),
        AssetAction::Unarchive { id } => transition(client, id, "/unarchive", "unarchived"),
        AssetAction::Restore { id } => transition(client, id, "/restore", "restored"),
        AssetAction::Delete { id } => {
            client.delete(&asset_path(id, ""))?;
            println!("{} Asset {} soft-deleted", "✓".green().bold(), id);
            Ok(())
        }
        AssetAction::Purge { id, yes } => {
            if !yes {
                return Err(anyhow::anyhow!(
                    "Permanent deletion also removes the provider's copy. Re-run with --yes."
                ));
            }
            client.delete(&asset_path(id, "/permanent"))?;
            println!("{} Asset {} permanently deleted", "✓".green().bold(), id);
            Ok(())
        }
        AssetAction::Associate { id, owner } => {
            let owner = parse_owner(&owner)?;
            let record = client.post(&asset_path(id, "/owners"), Some(&json!(owner)))?;
            print_owner_line(id, &record);
            Ok(())
        }
        AssetAction::Deassociate { id, owner } => {
            let owner = parse_owner(&owner)?;
            let path = asset_path(id, &format!("/owners/{}/{}", owner.owner_type, owner.owner_id));
            let record = client.delete(&path)?;
            print_owner_line(id, &record);
            Ok(())
        }
        AssetAction::SetOwners { id, owners } => {
            let owners = owners
                .iter()
                .map(|raw| parse_owner(raw))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let record = client.put(&asset_path(id, "/owners"), &json!({ "owners": owners }))?;
            print_owner_line(id, &record);
            Ok(())
        }
        AssetAction::Playback {
            id,
            viewer,
            ttl,
            claims,
        } => {
            let claims = claims::parse_claims(&claims)?;
            let body = json!({
                "viewer": viewer,
                "ttl_secs": ttl,
                "claims": claims,
            });
            let credential = client.post(&asset_path(id, "/playback-token"), Some(&body))?;
            println!("{}", credential["token"].as_str().unwrap_or_default());
            eprintln!(
                "  Expires: {}",
                credential["expires_at"].as_str().unwrap_or("?").dimmed()
            );
            Ok(())
        }
    }
}

fn handle_admin(client: &ApiClient, action: AdminAction) -> anyhow::Result<()> {
    match action {
        AdminAction::Reconcile => {
            let report = client.post("/admin/reconcile", None)?;
            let failed = report["failed"].as_u64().unwrap_or(0);
            let mark = if failed == 0 { "✓".green().bold() } else { "!".yellow().bold() };
            println!("{} Reconciliation finished", mark);
            println!();
            println!("  Scanned:  {}", report["scanned"]);
            println!("  Repaired: {}", report["repaired"]);
            println!("  Failed:   {}", failed);
            Ok(())
        }
        AdminAction::Mirror => {
            let status = client.get("/admin/mirror", &[])?;
            println!("Pending metadata repairs: {}", status["pending"]);
            Ok(())
        }
        AdminAction::Health => {
            let health = client.get("/health", &[])?;
            println!(
                "{} {} (mirror pending: {})",
                "✓".green().bold(),
                health["status"].as_str().unwrap_or("?"),
                health["mirror_pending"]
            );
            Ok(())
        }
    }
}

fn handle_keys(action: KeyAction) -> anyhow::Result<()> {
    match action {
        KeyAction::Generate { out, force } => {
            let key = keys::generate();
            match out {
                Some(path) => {
                    keys::write_key_file(&path, &key.signing_key, force)?;
                    println!("{} Signing key written to {}", "✓".green().bold(), path.display());
                }
                None => {
                    println!("PLAYBACK_SIGNING_KEY={}", key.signing_key);
                }
            }
            println!();
            println!("  Key id:     {}", key.key_id);
            println!("  Public key: {}", key.public_key_hex);
            println!();
            println!(
                "Keep the signing key secret - anyone holding it can mint playback credentials."
            );
            Ok(())
        }
        KeyAction::Show { path } => {
            let encoded = keys::read_key_file(&path)?;
            let signing_key = mediavault_crypto::decode_signing_key(&encoded)?;
            let verifying_key = signing_key.verifying_key();
            println!("  Key id:     {}", mediavault_crypto::key_id(&verifying_key));
            println!(
                "  Public key: {}",
                verifying_key
                    .as_bytes()
                    .iter()
                    .map(|b| format!("{:02x}", b))
                    .collect::<String>()
            );
            Ok(())
        }
    }
}

fn handle_webhook(client: &ApiClient, action: WebhookAction) -> anyhow::Result<()> {
    match action {
        WebhookAction::Sign {
            body,
            secret,
            timestamp,
            send,
        } => {
            let bytes = std::fs::read(&body)
                .map_err(|e| anyhow::anyhow!("Failed to read '{}': {}", body.display(), e))?;
            serde_json::from_slice::<Value>(&bytes)
                .map_err(|e| anyhow::anyhow!("'{}' is not valid JSON: {}", body.display(), e))?;

            let timestamp = timestamp.unwrap_or_else(unix_now);
            let signature =
                mediavault_crypto::signature_header(secret.as_bytes(), timestamp, &bytes)?;

            if send {
                let ack = client.post_webhook(timestamp, &signature, &bytes)?;
                println!(
                    "{} Delivered: {}",
                    "✓".green().bold(),
                    ack["outcome"].as_str().unwrap_or("?")
                );
            } else {
                println!("{}: {}", api::WEBHOOK_TIMESTAMP_HEADER, timestamp);
                println!("{}: {}", api::WEBHOOK_SIGNATURE_HEADER, signature);
            }
            Ok(())
        }
    }
}

fn transition(client: &ApiClient, id: Uuid, suffix: &str, verb: &str) -> anyhow::Result<()> {
    let record = client.post(&asset_path(id, suffix), None)?;
    println!(
        "{} Asset {} {} (state: {})",
        "✓".green().bold(),
        id,
        verb,
        record["state"].as_str().unwrap_or("?")
    );
    Ok(())
}

fn push_param<T: ToString>(
    query: &mut Vec<(&'static str, String)>,
    key: &'static str,
    value: Option<T>,
) {
    if let Some(value) = value {
        query.push((key, value.to_string()));
    }
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_owner_line(id: Uuid, record: &Value) {
    match (record["owner_type"].as_str(), record["owner_id"].as_str()) {
        (Some(owner_type), Some(owner_id)) => {
            println!("{} Asset {} owned by {}:{}", "✓".green().bold(), id, owner_type, owner_id)
        }
        _ => println!("{} Asset {} has no owner", "✓".green().bold(), id),
    }
}

fn print_asset_table(listed: &Value) {
    let assets = listed["assets"].as_array().map(Vec::as_slice).unwrap_or_default();
    if assets.is_empty() {
        println!("{}", "No assets".dimmed());
        return;
    }
    for asset in assets {
        let owner = match (asset["owner_type"].as_str(), asset["owner_id"].as_str()) {
            (Some(owner_type), Some(owner_id)) => format!("{}:{}", owner_type, owner_id),
            _ => "-".to_string(),
        };
        let deleted = if asset["deleted_at"].is_null() { "" } else { " (deleted)" };
        println!(
            "{}  {:<6} {:<9} {}{}",
            asset["id"].as_str().unwrap_or("?"),
            asset["kind"].as_str().unwrap_or("?"),
            asset["state"].as_str().unwrap_or("?"),
            owner,
            deleted.red()
        );
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
