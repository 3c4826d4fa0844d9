//! Command-line surface over the asset cache and the local store.

use clap::{Args, Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::cache::clients::{ClientId, ClientMessage};
use crate::cache::{
  CacheStorage, ClientKind, ClientRegistry, HttpNetwork, Method, Registration, Request,
  SqliteStorage,
};
use crate::config::Config;
use crate::downloads::simulate_download;
use crate::event::{spawn_worker, WorkerHandle};
use crate::search::{find, RankedMatcher, ResourceFilter};
use crate::state::LibraryState;
use crate::store::{LocalStore, Resource, ResourceId, Snapshot};

#[derive(Parser, Debug)]
#[command(name = "studyshelf")]
#[command(about = "Offline cache and local library for a study resources app")]
#[command(version)]
pub struct Cli {
  /// Path to config file (default: $XDG_CONFIG_HOME/studyshelf/config.yaml)
  #[arg(short, long, global = true)]
  pub config: Option<PathBuf>,

  /// Also log to stderr
  #[arg(short, long, global = true)]
  pub verbose: bool,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Cache every manifest asset as a new generation and activate it
  Install,
  /// Fetch a path through the controller
  Fetch {
    path: String,
    #[arg(short, long, default_value = "GET")]
    method: String,
    /// Send `Accept: text/html`, as a page navigation would
    #[arg(long)]
    html: bool,
  },
  /// List cache generations and their entries
  Generations,
  /// Delete every generation except the active one
  Cleanup,
  /// Activate a waiting worker now
  SkipWaiting,
  /// Deliver a push event with an optional JSON payload
  Push { payload: Option<String> },
  /// Click a notification; unknown ids open the app root
  Click {
    #[arg(default_value_t = 0)]
    id: u64,
  },
  /// Run a background sync
  Sync { tag: String },
  #[command(subcommand)]
  Resources(ResourcesCommand),
  /// Search the resource mirror
  Search {
    query: String,
    #[command(flatten)]
    filter: FilterArgs,
  },
  #[command(subcommand)]
  Favorite(FavoriteCommand),
  #[command(subcommand)]
  Note(NoteCommand),
  #[command(subcommand)]
  Download(DownloadCommand),
  #[command(subcommand)]
  Setting(SettingCommand),
  /// Write every collection to a JSON file
  Export { file: PathBuf },
  /// Replace the store with a JSON export
  Import { file: PathBuf },
  /// Empty every collection
  Clear,
}

#[derive(Args, Debug)]
pub struct FilterArgs {
  #[arg(long)]
  category: Option<String>,
  #[arg(long)]
  subject: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum ResourcesCommand {
  /// Replace the mirror with a JSON array of resources
  Load { file: PathBuf },
  List,
  Show { id: ResourceId },
}

#[derive(Subcommand, Debug)]
pub enum FavoriteCommand {
  Add { id: ResourceId },
  Remove { id: ResourceId },
  Toggle { id: ResourceId },
  List,
}

#[derive(Subcommand, Debug)]
pub enum NoteCommand {
  Add { resource: ResourceId, content: String },
  Edit { id: u64, content: String },
  /// Notes of one resource, or all notes
  List { resource: Option<ResourceId> },
  Delete { id: u64 },
}

#[derive(Subcommand, Debug)]
pub enum DownloadCommand {
  /// Start a download and simulate its progress to completion
  Start {
    resource: ResourceId,
    #[arg(long, default_value_t = 10)]
    step: u8,
    #[arg(long, default_value_t = 200)]
    tick_ms: u64,
  },
  List,
  Delete { id: u64 },
}

#[derive(Subcommand, Debug)]
pub enum SettingCommand {
  Get { key: String },
  /// Value is parsed as JSON, falling back to a plain string
  Set { key: String, value: String },
  List,
}

type AppRegistration = Registration<SqliteStorage, HttpNetwork>;

/// The controller side, as seen from one foreground window.
struct Controller {
  registration: Arc<AppRegistration>,
  worker: WorkerHandle,
  window: ClientId,
  inbox: mpsc::UnboundedReceiver<ClientMessage>,
}

impl Controller {
  fn start(config: &Config) -> Result<Self> {
    let storage = Arc::new(SqliteStorage::open(&config.cache_database_path()?)?);
    let network = Arc::new(HttpNetwork::new()?);
    let clients = Arc::new(ClientRegistry::new());
    let registration = Arc::new(Registration::new(config, storage, network, clients)?);
    registration.restore()?;

    let origin = registration.policy().origin.to_string();
    let (window, inbox) = registration.clients().connect(&origin, ClientKind::Window)?;
    let worker = spawn_worker(Arc::clone(&registration));

    Ok(Self {
      registration,
      worker,
      window,
      inbox,
    })
  }

  fn drain_inbox(&mut self) {
    while let Ok(message) = self.inbox.try_recv() {
      match serde_json::to_string(&message) {
        Ok(text) => println!("message: {}", text),
        Err(e) => tracing::warn!(error = %e, "Failed to render client message"),
      }
    }
  }
}

impl Command {
  /// Commands served by the cache controller rather than the store
  fn is_cache(&self) -> bool {
    matches!(
      self,
      Command::Install
        | Command::Fetch { .. }
        | Command::Generations
        | Command::Cleanup
        | Command::SkipWaiting
        | Command::Push { .. }
        | Command::Click { .. }
        | Command::Sync { .. }
    )
  }
}

pub async fn run(cli: Cli, config: Config) -> Result<()> {
  if cli.command.is_cache() {
    let mut controller = Controller::start(&config)?;
    run_cache(&controller, cli.command).await?;
    controller.registration.settle().await;
    controller.drain_inbox();
    controller.registration.clients().disconnect(controller.window)?;
    return Ok(());
  }

  let store = Arc::new(LocalStore::open(&config.store_database_path()?)?);
  let result = run_store(Arc::clone(&store), cli.command).await;
  if let Err(e) = store.database().close() {
    tracing::warn!(error = %e, "Failed to close store database");
  }
  result
}

async fn run_cache(controller: &Controller, command: Command) -> Result<()> {
  let worker = &controller.worker;
  let registration = &controller.registration;

  match command {
    Command::Install => {
      let generation = worker.install().await?;
      let state = registration
        .active()
        .map(|w| w.state().to_string())
        .unwrap_or_else(|| "none".to_string());
      println!("installed {} ({})", generation, state);
    }
    Command::Fetch { path, method, html } => {
      let url = registration.policy().resolve(&path)?;
      let mut request = Request::new(Method::parse(&method), url);
      if html {
        request = request.with_header("accept", "text/html");
      }
      let result = worker.fetch(request).await?;
      println!(
        "{} {} ({} bytes)",
        result.response.status,
        result.source,
        result.response.body.len()
      );
    }
    Command::Generations => {
      let storage = registration.storage();
      let active = storage.active_generation()?;
      for name in storage.generation_names()? {
        let marker = if active.as_deref() == Some(name.as_str()) { "*" } else { " " };
        println!("{} {}", marker, name);
        for entry in storage.entries(&name)? {
          println!("    {} {} {} {}B", entry.status, entry.method, entry.url, entry.size);
        }
      }
    }
    Command::Cleanup => {
      let data = json!({ "action": "cleanupCache" });
      worker.post_message(Some(controller.window), data).await?;
    }
    Command::SkipWaiting => {
      let data = json!({ "action": "skipWaiting" });
      worker.post_message(Some(controller.window), data).await?;
      match registration.active() {
        Some(active) => println!("active: {}", active.generation()),
        None => println!("no active worker"),
      }
    }
    Command::Push { payload } => {
      let notification = worker.push(payload.map(String::into_bytes)).await?;
      println!("{}", serde_json::to_string_pretty(&notification)?);
    }
    Command::Click { id } => {
      let outcome = worker.notification_click(id).await?;
      println!("{:?}", outcome);
    }
    Command::Sync { tag } => {
      let outcome = worker.sync(tag).await?;
      println!("{:?}", outcome);
    }
    other => return Err(eyre!("Not a cache command: {:?}", other)),
  }
  Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
  let contents = std::fs::read_to_string(path)
    .map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?;
  serde_json::from_str(&contents).map_err(|e| eyre!("Failed to parse {}: {}", path.display(), e))
}

fn print_resource(resource: &Resource, favorite: bool) {
  let star = if favorite { "*" } else { " " };
  println!(
    "{} {:>4}  {}  [{} / {}]",
    star, resource.id, resource.title, resource.category, resource.subject
  );
}

async fn run_store(store: Arc<LocalStore>, command: Command) -> Result<()> {
  match command {
    Command::Resources(ResourcesCommand::Load { file }) => {
      let resources: Vec<Resource> = read_json(&file)?;
      store.save_resources(&resources)?;
      println!("loaded {} resources", resources.len());
    }
    Command::Resources(ResourcesCommand::List) => {
      let state = LibraryState::load(&store)?;
      for resource in &state.resources {
        print_resource(resource, state.favorites.contains(&resource.id));
      }
    }
    Command::Resources(ResourcesCommand::Show { id }) => {
      let resource = store
        .get_resource(id)?
        .ok_or_else(|| eyre!("No resource with id {}", id))?;
      print_resource(&resource, store.is_favorite(id)?);
      if !resource.description.is_empty() {
        println!("       {}", resource.description);
      }
      for note in store.get_notes_by_resource(id)? {
        println!("       - {}", note.content);
      }
    }
    Command::Search { query, filter } => {
      let state = LibraryState::load(&store)?;
      let filter = ResourceFilter {
        category: filter.category,
        subject: filter.subject,
      };
      for resource in find(&RankedMatcher, &state.resources, &query, &filter) {
        print_resource(resource, state.favorites.contains(&resource.id));
      }
    }
    Command::Favorite(command) => match command {
      FavoriteCommand::Add { id } => store.add_favorite(id)?,
      FavoriteCommand::Remove { id } => {
        if !store.remove_favorite(id)? {
          println!("{} was not a favorite", id);
        }
      }
      FavoriteCommand::Toggle { id } => {
        let state = LibraryState::load(&store)?.toggle_favorite(&store, id)?;
        println!("{} favorite: {}", id, state.favorites.contains(&id));
      }
      FavoriteCommand::List => {
        let state = LibraryState::load(&store)?;
        for resource in state.favorite_resources() {
          print_resource(resource, true);
        }
      }
    },
    Command::Note(command) => match command {
      NoteCommand::Add { resource, content } => {
        let state = LibraryState::load(&store)?.add_note(&store, resource, &content)?;
        println!("{} notes on {}", state.notes.get(&resource).map_or(0, Vec::len), resource);
      }
      NoteCommand::Edit { id, content } => {
        let note = store.update_note(id, &content)?;
        println!("updated note {}", note.id);
      }
      NoteCommand::List { resource } => {
        let state = LibraryState::load(&store)?;
        let notes: Vec<_> = match resource {
          Some(id) => state.notes_for(id).iter().collect(),
          None => state
            .resources
            .iter()
            .flat_map(|r| state.notes_for(r.id))
            .collect(),
        };
        for note in notes {
          println!("{:>14}  [{}] {}", note.id, note.resource_id, note.content);
        }
      }
      NoteCommand::Delete { id } => {
        LibraryState::load(&store)?.delete_note(&store, id)?;
      }
    },
    Command::Download(command) => match command {
      DownloadCommand::Start {
        resource,
        step,
        tick_ms,
      } => {
        let (state, download) = LibraryState::load(&store)?.start_download(&store, resource)?;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let simulation = tokio::spawn(simulate_download(
          Arc::clone(&store),
          download.id,
          step,
          Duration::from_millis(tick_ms),
          Some(tx),
        ));

        let mut state = state;
        while let Some(update) = rx.recv().await {
          println!("{:>3}% {}", update.progress, update.title);
          state = state.with_download(update);
        }
        simulation
          .await
          .map_err(|e| eyre!("Download task failed: {}", e))??;
        println!("{} downloads tracked", state.visible_downloads().len());
      }
      DownloadCommand::List => {
        let state = LibraryState::load(&store)?;
        for download in state.visible_downloads() {
          println!("{:>14}  {:>3}%  {}", download.id, download.progress, download.title);
        }
      }
      DownloadCommand::Delete { id } => {
        if !store.delete_download(id)? {
          println!("no download {}", id);
        }
      }
    },
    Command::Setting(command) => match command {
      SettingCommand::Get { key } => match store.get_setting(&key)? {
        Some(value) => println!("{}", value),
        None => println!("{} is not set", key),
      },
      SettingCommand::Set { key, value } => {
        let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
        store.set_setting(&key, value)?;
      }
      SettingCommand::List => {
        for setting in store.get_settings()? {
          println!("{} = {}", setting.key, setting.value);
        }
      }
    },
    Command::Export { file } => {
      let json = store.export_data()?.to_json()?;
      std::fs::write(&file, json)
        .map_err(|e| eyre!("Failed to write {}: {}", file.display(), e))?;
      println!("exported to {}", file.display());
    }
    Command::Import { file } => {
      let contents = std::fs::read_to_string(&file)
        .map_err(|e| eyre!("Failed to read {}: {}", file.display(), e))?;
      store.import_data(&Snapshot::from_json(&contents)?)?;
      println!("imported {}", file.display());
    }
    Command::Clear => store.clear_all_data()?,
    other => return Err(eyre!("Not a store command: {:?}", other)),
  }
  Ok(())
}
