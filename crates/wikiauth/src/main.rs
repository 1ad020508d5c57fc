use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{ArgGroup, Args, CommandFactory, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};
use wikiauth_core::client::{ClientFactory, current_page, recent_contributions, submit_edit};
use wikiauth_core::config::{DEFAULT_CONFIG_FILENAME, Settings, load_config};
use wikiauth_core::credentials::{CredentialStore, User};
use wikiauth_core::database::Databases;
use wikiauth_core::login::{LoginFlow, complete_login};
use wikiauth_core::migrate::{pending_migration_count, run_migrations};
use wikiauth_core::oauth::AccessToken;
use wikiauth_core::profile::load_profile;
use wikiauth_core::replica::ReplicaReader;
use wikiauth_core::router::EntityKind;

const MAX_SEARCH_RESULTS: usize = 100;

#[derive(Debug, Parser)]
#[command(
    name = "wikiauth",
    version,
    about = "Wikimedia OAuth login, per-user wiki clients and read-only replica queries"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(short, long, global = true, action = clap::ArgAction::Count, help = "Increase log verbosity")]
    verbose: u8,
    #[arg(long, global = true, help = "Print results as JSON")]
    json: bool,
    #[arg(long, global = true, help = "Print resolved settings")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    config: Option<PathBuf>,
    json: bool,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            config: cli.config.clone(),
            json: cli.json,
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Db(DbArgs),
    Login(LoginArgs),
    #[command(about = "Show a user's wiki profile")]
    Profile(UserArgs),
    #[command(about = "List a user's most recent contributions")]
    Contributions(ContributionsArgs),
    #[command(about = "Show the current text of a page as the given user sees it")]
    Page(PageArgs),
    #[command(about = "Save a page as the given user")]
    Edit(EditArgs),
    #[command(about = "Remove a user's stored wiki credential")]
    Unlink(UserArgs),
    Replica(ReplicaArgs),
    #[command(about = "Show which connection serves an entity")]
    Route(RouteArgs),
}

#[derive(Debug, Args)]
struct DbArgs {
    #[command(subcommand)]
    command: DbSubcommand,
}

#[derive(Debug, Subcommand)]
enum DbSubcommand {
    #[command(about = "Apply pending primary database migrations")]
    Migrate,
    #[command(about = "Show primary and replica database status")]
    Status,
}

#[derive(Debug, Args)]
struct LoginArgs {
    #[command(subcommand)]
    command: LoginSubcommand,
}

#[derive(Debug, Subcommand)]
enum LoginSubcommand {
    #[command(about = "Request a token and print the authorization URL")]
    Start,
    #[command(about = "Exchange the verifier for an access token and link the account")]
    Finish {
        #[arg(long, value_name = "KEY")]
        request_key: String,
        #[arg(long, value_name = "SECRET")]
        request_secret: String,
        #[arg(long, value_name = "CODE")]
        verifier: String,
    },
}

#[derive(Debug, Args)]
struct UserArgs {
    #[arg(long, value_name = "NAME")]
    user: String,
}

#[derive(Debug, Args)]
struct ContributionsArgs {
    #[arg(long, value_name = "NAME")]
    user: String,
    #[arg(long, default_value_t = 10)]
    limit: usize,
}

#[derive(Debug, Args)]
struct PageArgs {
    #[arg(long, value_name = "NAME")]
    user: String,
    #[arg(long, value_name = "TITLE")]
    title: String,
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("content").required(true).args(["text", "file"])))]
struct EditArgs {
    #[arg(long, value_name = "NAME")]
    user: String,
    #[arg(long, value_name = "TITLE")]
    title: String,
    #[arg(long, default_value = "")]
    summary: String,
    #[arg(long, value_name = "TEXT")]
    text: Option<String>,
    #[arg(long, value_name = "PATH")]
    file: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ReplicaArgs {
    #[command(subcommand)]
    command: ReplicaSubcommand,
}

#[derive(Debug, Subcommand)]
enum ReplicaSubcommand {
    #[command(about = "Recent changes, newest first")]
    Recent {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    #[command(about = "Look up a page by title")]
    Page {
        title: String,
        #[arg(long, default_value_t = 0)]
        namespace: i64,
    },
    #[command(about = "Search page titles")]
    Search {
        query: String,
        #[arg(long, default_value_t = 0)]
        namespace: i64,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    #[command(about = "Revisions of a page, newest first")]
    Revisions {
        page_id: i64,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    #[command(about = "Pages in a namespace, most recently touched first")]
    Pages {
        #[arg(long, default_value_t = 0)]
        namespace: i64,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    #[command(about = "Look up a wiki user")]
    User { name: String },
    #[command(about = "Log entries, newest first")]
    Logs {
        #[arg(long = "type", value_name = "TYPE")]
        log_type: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    #[command(about = "Look up an actor")]
    Actor { name: String },
    #[command(about = "Aggregate page statistics")]
    Stats,
}

#[derive(Debug, Args)]
struct RouteArgs {
    entity: String,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let runtime = RuntimeOptions::from_cli(&cli);

    let result = match cli.command {
        Some(Commands::Db(DbArgs { command })) => match command {
            DbSubcommand::Migrate => run_db_migrate(&runtime),
            DbSubcommand::Status => run_db_status(&runtime),
        },
        Some(Commands::Login(LoginArgs { command })) => match command {
            LoginSubcommand::Start => run_login_start(&runtime),
            LoginSubcommand::Finish {
                request_key,
                request_secret,
                verifier,
            } => run_login_finish(
                &runtime,
                AccessToken::new(request_key, request_secret),
                &verifier,
            ),
        },
        Some(Commands::Profile(UserArgs { user })) => run_profile(&runtime, &user),
        Some(Commands::Contributions(args)) => run_contributions(&runtime, args),
        Some(Commands::Page(args)) => run_page(&runtime, args),
        Some(Commands::Edit(args)) => run_edit(&runtime, args),
        Some(Commands::Unlink(UserArgs { user })) => run_unlink(&runtime, &user),
        Some(Commands::Replica(ReplicaArgs { command })) => run_replica(&runtime, command),
        Some(Commands::Route(RouteArgs { entity })) => run_route(&runtime, &entity),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    };
    result.map_err(explain)
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Prefix library failures with the message their kind calls for.
fn explain(error: anyhow::Error) -> anyhow::Error {
    let kind = error
        .downcast_ref::<wikiauth_core::Error>()
        .map(wikiauth_core::Error::kind);
    match kind {
        Some(kind) => error.context(kind.user_message()),
        None => error,
    }
}

struct Runtime {
    settings: Settings,
    databases: Databases,
}

impl Runtime {
    fn load(options: &RuntimeOptions) -> Result<Self> {
        let config_path = options
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILENAME));
        let base_dir = config_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let config = load_config(&config_path)?;
        let settings = Settings::resolve(&config, &base_dir)
            .with_context(|| format!("failed to resolve settings from {}", config_path.display()))?;
        let databases = Databases::new(&settings);
        if options.diagnostics {
            eprintln!("[diagnostics]\n{}\n", settings.diagnostics());
        }
        Ok(Self {
            settings,
            databases,
        })
    }

    /// Primary-backed commands bring the schema up to date first.
    fn ensure_schema(&self) -> Result<()> {
        if pending_migration_count(&self.databases)? > 0 {
            let report = run_migrations(&self.databases)?;
            tracing::info!(
                applied = report.applied.len(),
                version = report.current_version,
                "applied pending migrations"
            );
        }
        Ok(())
    }

    fn store(&self) -> CredentialStore<'_> {
        CredentialStore::new(&self.databases)
    }

    fn factory(&self) -> ClientFactory {
        ClientFactory::from_settings(&self.settings)
    }

    fn replica(&self) -> ReplicaReader<'_> {
        ReplicaReader::new(&self.databases, self.settings.replica.max_rows)
    }

    fn require_user(&self, username: &str) -> Result<User> {
        match self.store().find_user(username)? {
            Some(user) => Ok(user),
            None => bail!("unknown user {username}; run `wikiauth login start` first"),
        }
    }
}

fn run_db_migrate(options: &RuntimeOptions) -> Result<()> {
    let runtime = Runtime::load(options)?;
    let report = run_migrations(&runtime.databases)?;

    if options.json {
        return print_json(&serde_json::json!({
            "connection": report.connection,
            "applied": report
                .applied
                .iter()
                .map(|migration| serde_json::json!({"version": migration.version, "name": migration.name}))
                .collect::<Vec<_>>(),
            "current_version": report.current_version,
        }));
    }
    println!("db migrate");
    println!("connection: {}", report.connection);
    println!("db_path: {}", normalize_path(runtime.databases.primary_path()));
    if report.applied.is_empty() {
        println!("applied: <none>");
    }
    for migration in &report.applied {
        println!("applied: v{:03} {}", migration.version, migration.name);
    }
    println!("current_version: {}", report.current_version);
    Ok(())
}

fn run_db_status(options: &RuntimeOptions) -> Result<()> {
    let runtime = Runtime::load(options)?;
    let settings = &runtime.settings;
    let pending = pending_migration_count(&runtime.databases)?;
    let replica_exists = runtime.databases.replica_path().exists();

    if options.json {
        return print_json(&serde_json::json!({
            "primary": {
                "name": settings.primary.name,
                "path": normalize_path(&settings.primary.path),
                "exists": runtime.databases.primary_path().exists(),
                "pending_migrations": pending,
            },
            "replica": {
                "name": settings.replica.connection.name,
                "path": normalize_path(&settings.replica.connection.path),
                "host": settings.replica.host,
                "exists": replica_exists,
                "max_rows": settings.replica.max_rows,
            },
        }));
    }
    println!("db status");
    println!("primary.name: {}", settings.primary.name);
    println!("primary.path: {}", normalize_path(&settings.primary.path));
    println!(
        "primary.exists: {}",
        format_flag(runtime.databases.primary_path().exists())
    );
    println!("primary.pending_migrations: {pending}");
    println!("replica.name: {}", settings.replica.connection.name);
    println!(
        "replica.path: {}",
        normalize_path(&settings.replica.connection.path)
    );
    println!("replica.host: {}", settings.replica.host);
    println!("replica.exists: {}", format_flag(replica_exists));
    println!("replica.max_rows: {}", settings.replica.max_rows);
    Ok(())
}

fn run_login_start(options: &RuntimeOptions) -> Result<()> {
    let runtime = Runtime::load(options)?;
    let pending = LoginFlow::new(&runtime.settings)?.initiate()?;

    if options.json {
        return print_json(&serde_json::json!({
            "request_key": pending.request_token.token,
            "request_secret": pending.request_token.secret,
            "authorize_url": pending.authorize_url,
        }));
    }
    println!("login start");
    println!("authorize_url: {}", pending.authorize_url);
    println!("request_key: {}", pending.request_token.token);
    println!("request_secret: {}", pending.request_token.secret);
    println!(
        "next: open the URL, approve, then run `wikiauth login finish --request-key <KEY> --request-secret <SECRET> --verifier <CODE>`"
    );
    Ok(())
}

fn run_login_finish(
    options: &RuntimeOptions,
    request_token: AccessToken,
    verifier: &str,
) -> Result<()> {
    let runtime = Runtime::load(options)?;
    runtime.ensure_schema()?;
    let access_token = LoginFlow::new(&runtime.settings)?.complete(&request_token, verifier)?;
    let factory = runtime.factory();
    let mut client = factory.client_for_token(factory.home(), access_token.clone())?;
    let user = complete_login(&runtime.store(), &mut client, &access_token)?;

    if options.json {
        return print_json(&user);
    }
    println!("login finish");
    println!("user: {}", user.username);
    println!("linked: yes");
    Ok(())
}

fn run_profile(options: &RuntimeOptions, username: &str) -> Result<()> {
    let runtime = Runtime::load(options)?;
    runtime.ensure_schema()?;
    let user = runtime.require_user(username)?;
    let profile = load_profile(&runtime.store(), &runtime.factory(), &user)?;

    if options.json {
        return print_json(&profile);
    }
    println!("profile");
    println!("username: {}", profile.username);
    println!("has_oauth: {}", format_flag(profile.has_oauth));
    println!("edit_count: {}", profile.edit_count);
    println!(
        "groups: {}",
        if profile.groups.is_empty() {
            "<none>".to_string()
        } else {
            profile.groups.join(", ")
        }
    );
    if let Some(kind) = profile.wiki_error {
        println!("wiki_error: {kind}");
    }
    Ok(())
}

fn run_contributions(options: &RuntimeOptions, args: ContributionsArgs) -> Result<()> {
    let runtime = Runtime::load(options)?;
    runtime.ensure_schema()?;
    let user = runtime.require_user(&args.user)?;
    let mut client = runtime
        .factory()
        .create_client(&runtime.store(), &user, None)?;
    let contributions = recent_contributions(&mut client, &user.username, args.limit)?;

    if options.json {
        return print_json(&contributions);
    }
    println!("contributions");
    println!("user: {}", user.username);
    println!("count: {}", contributions.len());
    for contribution in &contributions {
        println!(
            "{} r{} {} ({} bytes) {}",
            contribution.timestamp,
            contribution.revision_id,
            contribution.page,
            contribution.size,
            contribution.comment
        );
    }
    Ok(())
}

fn run_page(options: &RuntimeOptions, args: PageArgs) -> Result<()> {
    let runtime = Runtime::load(options)?;
    runtime.ensure_schema()?;
    let user = runtime.require_user(&args.user)?;
    let mut client = runtime
        .factory()
        .create_client(&runtime.store(), &user, None)?;
    let page = current_page(&mut client, &args.title)?;

    if options.json {
        return print_json(&page);
    }
    println!("page");
    println!("title: {}", args.title);
    println!("exists: {}", format_flag(page.exists));
    if let Some(revision_id) = page.revision_id {
        println!("revision_id: {revision_id}");
    }
    println!("length: {}", page.length);
    if page.exists {
        println!();
        println!("{}", page.text);
    }
    Ok(())
}

fn run_edit(options: &RuntimeOptions, args: EditArgs) -> Result<()> {
    let text = match (args.text, args.file) {
        (Some(text), _) => text,
        (None, Some(path)) => fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, None) => bail!("either --text or --file is required"),
    };
    let runtime = Runtime::load(options)?;
    runtime.ensure_schema()?;
    let user = runtime.require_user(&args.user)?;
    let mut client = runtime
        .factory()
        .create_client(&runtime.store(), &user, None)?;
    let outcome = submit_edit(&mut client, &args.title, &text, &args.summary)?;

    if options.json {
        return print_json(&outcome);
    }
    println!("edit");
    println!("title: {}", args.title);
    println!("success: {}", format_flag(outcome.success));
    if let Some(revision_id) = outcome.revision_id {
        println!("revision_id: {revision_id}");
    }
    if let Some(detail) = &outcome.detail {
        println!("detail: {detail}");
    }
    if !outcome.success {
        bail!("edit to {} was not saved", args.title);
    }
    Ok(())
}

fn run_unlink(options: &RuntimeOptions, username: &str) -> Result<()> {
    let runtime = Runtime::load(options)?;
    runtime.ensure_schema()?;
    let user = runtime.require_user(username)?;
    let removed = runtime.store().unlink(&user)?;

    if options.json {
        return print_json(&serde_json::json!({"user": user.username, "removed": removed}));
    }
    println!("unlink");
    println!("user: {}", user.username);
    println!("removed: {}", format_flag(removed));
    Ok(())
}

fn run_replica(options: &RuntimeOptions, command: ReplicaSubcommand) -> Result<()> {
    let runtime = Runtime::load(options)?;
    let replica = runtime.replica();
    let json = options.json;

    match command {
        ReplicaSubcommand::Recent { limit } => {
            let changes = replica.recent_changes(limit)?;
            if json {
                return print_json(&changes);
            }
            println!("replica recent");
            println!("count: {}", changes.len());
            for change in &changes {
                println!(
                    "{} ns{} {} r{}",
                    change.rc_timestamp, change.rc_namespace, change.rc_title, change.rc_this_oldid
                );
            }
        }
        ReplicaSubcommand::Page { title, namespace } => {
            let page = replica.page_by_title(&title, namespace)?;
            if json {
                return print_json(&page);
            }
            println!("replica page");
            match page {
                Some(page) => {
                    println!("page_id: {}", page.page_id);
                    println!("title: {}", page.page_title);
                    println!("namespace: {}", page.page_namespace);
                    println!("redirect: {}", format_flag(page.page_is_redirect));
                    println!("latest: {}", page.page_latest);
                    println!("length: {}", page.page_len);
                    println!("touched: {}", page.page_touched);
                }
                None => println!("page: <not found>"),
            }
        }
        ReplicaSubcommand::Search {
            query,
            namespace,
            limit,
        } => {
            let pages = replica.search_pages(&query, namespace, limit.min(MAX_SEARCH_RESULTS))?;
            if json {
                return print_json(&pages);
            }
            println!("replica search");
            println!("query: {query}");
            println!("count: {}", pages.len());
            for page in &pages {
                println!("{} ({})", page.page_title, page.page_id);
            }
        }
        ReplicaSubcommand::Revisions { page_id, limit } => {
            let revisions = replica.page_revisions(page_id, limit)?;
            if json {
                return print_json(&revisions);
            }
            println!("replica revisions");
            println!("page_id: {page_id}");
            println!("count: {}", revisions.len());
            for revision in &revisions {
                println!(
                    "{} r{} actor={} len={}",
                    revision.rev_timestamp,
                    revision.rev_id,
                    revision.rev_actor,
                    revision
                        .rev_len
                        .map(|len| len.to_string())
                        .unwrap_or_else(|| "n/a".to_string())
                );
            }
        }
        ReplicaSubcommand::Pages { namespace, limit } => {
            let pages = replica.namespace_pages(namespace, limit)?;
            if json {
                return print_json(&pages);
            }
            println!("replica pages");
            println!("namespace: {namespace}");
            println!("count: {}", pages.len());
            for page in &pages {
                println!("{} {}", page.page_touched, page.page_title);
            }
        }
        ReplicaSubcommand::User { name } => {
            let user = replica.user_by_name(&name)?;
            if json {
                return print_json(&user);
            }
            println!("replica user");
            match user {
                Some(user) => {
                    println!("user_id: {}", user.user_id);
                    println!("name: {}", user.user_name);
                    println!(
                        "registration: {}",
                        user.user_registration.as_deref().unwrap_or("n/a")
                    );
                    println!("edit_count: {}", user.user_editcount.unwrap_or(0));
                }
                None => println!("user: <not found>"),
            }
        }
        ReplicaSubcommand::Logs { log_type, limit } => {
            let entries = replica.log_entries(log_type.as_deref(), limit)?;
            if json {
                return print_json(&entries);
            }
            println!("replica logs");
            println!("type: {}", log_type.as_deref().unwrap_or("<all>"));
            println!("count: {}", entries.len());
            for entry in &entries {
                println!(
                    "{} {}/{} {}",
                    entry.log_timestamp, entry.log_type, entry.log_action, entry.log_title
                );
            }
        }
        ReplicaSubcommand::Actor { name } => {
            let actor = replica.actor_by_name(&name)?;
            if json {
                return print_json(&actor);
            }
            println!("replica actor");
            match actor {
                Some(actor) => {
                    println!("actor_id: {}", actor.actor_id);
                    println!("name: {}", actor.actor_name);
                    println!(
                        "user_id: {}",
                        actor
                            .actor_user
                            .map(|id| id.to_string())
                            .unwrap_or_else(|| "<anonymous>".to_string())
                    );
                }
                None => println!("actor: <not found>"),
            }
        }
        ReplicaSubcommand::Stats => {
            let statistics = replica.page_statistics()?;
            if json {
                return print_json(&statistics);
            }
            println!("replica stats");
            println!("total_pages: {}", statistics.total_pages);
            println!("content_pages: {}", statistics.content_pages);
            println!("redirects: {}", statistics.redirects);
            println!("new_pages: {}", statistics.new_pages);
            println!("recent_changes: {}", statistics.recent_changes_count);
        }
    }
    Ok(())
}

fn run_route(options: &RuntimeOptions, entity: &str) -> Result<()> {
    let Some(kind) = EntityKind::parse(entity) else {
        let known = EntityKind::ALL
            .iter()
            .map(|kind| kind.table())
            .collect::<Vec<_>>()
            .join(", ");
        bail!("unknown entity {entity}; expected one of: {known}");
    };
    let runtime = Runtime::load(options)?;
    let router = runtime.databases.router();
    let write = router.route_for_write(kind);

    if options.json {
        return print_json(&serde_json::json!({
            "entity": kind,
            "store": kind.store(),
            "read": router.route_for_read(kind),
            "write": write.as_ref().ok(),
            "migrate": router.allow_migrate(router.primary_name(), kind),
        }));
    }
    println!("route {kind}");
    println!("table: {}", kind.table());
    println!("read: {}", router.route_for_read(kind));
    match write {
        Ok(name) => println!("write: {name}"),
        Err(error) => println!("write: rejected ({error})"),
    }
    println!(
        "migrate: {}",
        format_flag(router.allow_migrate(router.primary_name(), kind))
    );
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize output")?
    );
    Ok(())
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn edit_requires_text_or_file() {
        let missing = Cli::try_parse_from(["wikiauth", "edit", "--user", "Alice", "--title", "Sandbox"]);
        assert!(missing.is_err());

        let both = Cli::try_parse_from([
            "wikiauth", "edit", "--user", "Alice", "--title", "Sandbox", "--text", "x", "--file", "y",
        ]);
        assert!(both.is_err());

        let cli = Cli::try_parse_from([
            "wikiauth", "--json", "edit", "--user", "Alice", "--title", "Sandbox", "--text", "hello",
        ])
        .expect("parse");
        assert!(cli.json);
        assert!(matches!(cli.command, Some(Commands::Edit(EditArgs { text: Some(_), .. }))));
    }

    #[test]
    fn page_requires_user_and_title() {
        assert!(Cli::try_parse_from(["wikiauth", "page", "--title", "Sandbox"]).is_err());

        let cli = Cli::try_parse_from(["wikiauth", "page", "--user", "Alice", "--title", "Main Page"])
            .expect("parse");
        match cli.command {
            Some(Commands::Page(PageArgs { user, title })) => {
                assert_eq!(user, "Alice");
                assert_eq!(title, "Main Page");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn replica_commands_parse_defaults() {
        let cli = Cli::try_parse_from(["wikiauth", "replica", "search", "Python"]).expect("parse");
        match cli.command {
            Some(Commands::Replica(ReplicaArgs {
                command:
                    ReplicaSubcommand::Search {
                        query,
                        namespace,
                        limit,
                    },
            })) => {
                assert_eq!(query, "Python");
                assert_eq!(namespace, 0);
                assert_eq!(limit, 20);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::try_parse_from(["wikiauth", "-vv", "replica", "logs", "--type", "block"])
            .expect("parse");
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn library_errors_gain_user_message() {
        let error = anyhow::Error::new(wikiauth_core::Error::CredentialMissing {
            username: "Alice".to_string(),
        });
        let explained = explain(error);
        assert!(explained.to_string().contains("not linked"));
        assert!(format!("{explained:#}").contains("Alice"));
    }
}
