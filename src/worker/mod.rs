//! The caching worker.
//!
//! A [`ServiceWorker`] intercepts requests for a map application and answers
//! them from the network, from its caches, or both:
//! - navigations are network-first with the shell cache as fallback
//! - shell assets are cache-first, seeded at install
//! - map tiles are stale-while-revalidate with a bounded tile cache
//! - everything else passes straight through
//!
//! All state lives in the injected [`CacheStore`]; the worker only holds its
//! lifecycle state.

mod classify;
mod generation;
mod lifecycle;
mod manifest;
mod strategy;

use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

pub use classify::{Classifier, RequestClass};
pub use generation::{ActivationReport, Generation, GenerationManager, InstallReport};
pub use lifecycle::{ControlMessage, LifecycleState};
pub use manifest::ShellManifest;
pub use strategy::{ResponseSource, Served, StrategyEngine};

use crate::cache::{CacheStore, EvictionPolicy};
use crate::config::Config;
use crate::net::{Fetcher, Request};

/// Events delivered by the host.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
  Install,
  Activate,
  Fetch(Request),
  /// Raw JSON control message
  Message(String),
}

/// Result of handling a [`WorkerEvent`].
#[derive(Debug, Clone)]
pub enum EventOutcome {
  Installed {
    install: InstallReport,
    /// Present when install went straight on to activation
    activation: Option<ActivationReport>,
  },
  Activated(ActivationReport),
  Responded(Served),
  /// A control message was applied; activation ran if it was due
  Signalled(Option<ActivationReport>),
  /// Unrecognised control message
  Ignored,
}

pub struct ServiceWorker<S: CacheStore, F: Fetcher> {
  classifier: Classifier,
  generations: GenerationManager<S, F>,
  engine: StrategyEngine<S, F>,
  state: Mutex<LifecycleState>,
  skip_waiting: AtomicBool,
  clients_claimed: AtomicBool,
}

impl<S: CacheStore, F: Fetcher> ServiceWorker<S, F> {
  /// Build a worker for the generation named in `config`.
  ///
  /// Starts out waiting when that generation's shell cache already exists in
  /// the store, installing otherwise.
  pub fn new(config: &Config, store: Arc<S>, fetcher: Arc<F>) -> Result<Self> {
    let base = &config.app.base_url;
    let manifest = ShellManifest::new(base, &config.app.shell_assets)?;
    let generation = Generation::new(&config.app.cache_prefix, &config.app.version);
    let eviction = EvictionPolicy::new(config.max_tiles()?);

    let classifier = Classifier::new(base, &config.tiles.host, manifest.clone());
    let generations = GenerationManager::new(
      Arc::clone(&store),
      Arc::clone(&fetcher),
      generation.clone(),
      manifest,
    );
    let engine = StrategyEngine::new(store, fetcher, generation, eviction);

    let state = if generations.is_installed()? {
      LifecycleState::Waiting
    } else {
      LifecycleState::Installing
    };

    Ok(Self {
      classifier,
      generations,
      engine,
      state: Mutex::new(state),
      skip_waiting: AtomicBool::new(false),
      clients_claimed: AtomicBool::new(false),
    })
  }

  pub fn state(&self) -> LifecycleState {
    self.lock_state().clone()
  }

  pub fn generation(&self) -> &Generation {
    self.generations.generation()
  }

  /// Whether this worker has taken over already-open clients.
  pub fn controls_clients(&self) -> bool {
    self.clients_claimed.load(Ordering::SeqCst)
  }

  /// Route an event to its handler.
  pub async fn handle(&self, event: WorkerEvent) -> Result<EventOutcome> {
    match event {
      WorkerEvent::Install => {
        let install = self.install().await?;
        let activation = if self.skip_waiting.load(Ordering::SeqCst) {
          Some(self.activate().await?)
        } else {
          None
        };
        Ok(EventOutcome::Installed {
          install,
          activation,
        })
      }
      WorkerEvent::Activate => Ok(EventOutcome::Activated(self.activate().await?)),
      WorkerEvent::Fetch(request) => Ok(EventOutcome::Responded(self.fetch(&request).await)),
      WorkerEvent::Message(raw) => match ControlMessage::parse(&raw) {
        Some(message) => Ok(EventOutcome::Signalled(self.message(message).await)),
        None => {
          debug!(message = %raw, "Ignoring unknown control message");
          Ok(EventOutcome::Ignored)
        }
      },
    }
  }

  /// Seed the shell cache for this generation.
  ///
  /// On failure the instance becomes redundant and nothing of this generation
  /// is stored. On success it waits, with skip-waiting requested.
  pub async fn install(&self) -> Result<InstallReport> {
    {
      let mut state = self.lock_state();
      if let LifecycleState::Active { version } = &*state {
        return Err(eyre!("Generation {} is already active", version));
      }
      *state = LifecycleState::Installing;
    }

    match self.generations.install().await {
      Ok(report) => {
        self.set_state(LifecycleState::Waiting);
        self.skip_waiting.store(true, Ordering::SeqCst);
        Ok(report)
      }
      Err(e) => {
        self.set_state(LifecycleState::Redundant);
        Err(e)
      }
    }
  }

  /// Delete stale generations and take control of clients.
  ///
  /// Only an installed instance can activate. Cleanup itself never fails.
  pub async fn activate(&self) -> Result<ActivationReport> {
    match self.state() {
      LifecycleState::Installing | LifecycleState::Redundant => {
        return Err(eyre!(
          "Generation {} is not installed",
          self.generation().version()
        ));
      }
      LifecycleState::Waiting | LifecycleState::Active { .. } => {}
    }

    let report = self.generations.activate().await;

    self.set_state(LifecycleState::Active {
      version: self.generation().version().to_string(),
    });
    self.clients_claimed.store(true, Ordering::SeqCst);

    info!(
      version = self.generation().version(),
      deleted = report.deleted.len(),
      failed = report.failed.len(),
      "Worker activated"
    );

    Ok(report)
  }

  /// Apply a control message. Returns the activation it triggered, if any.
  pub async fn message(&self, message: ControlMessage) -> Option<ActivationReport> {
    match message {
      ControlMessage::SkipWaiting => {
        self.skip_waiting.store(true, Ordering::SeqCst);
        if self.state() == LifecycleState::Waiting {
          self.activate().await.ok()
        } else {
          None
        }
      }
    }
  }

  /// Answer an intercepted request. Never fails.
  pub async fn fetch(&self, request: &Request) -> Served {
    let class = self.classifier.classify(request);
    let served = self.engine.respond(class, request).await;

    debug!(
      url = %request.url,
      class = class.as_str(),
      source = served.source.as_str(),
      status = served.response.status,
      "Served request"
    );

    served
  }

  /// Wait for background cache updates to finish.
  pub async fn drain(&self) {
    self.engine.drain().await;
  }

  fn lock_state(&self) -> std::sync::MutexGuard<'_, LifecycleState> {
    self
      .state
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn set_state(&self, state: LifecycleState) {
    *self.lock_state() = state;
  }
}
