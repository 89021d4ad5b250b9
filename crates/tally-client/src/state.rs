use std::sync::Arc;

use chrono_tz::Tz;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tally_shared::{CategoryDto, SkippedAppDto, TimeBlockDto};
use tracing::{debug, info, instrument};

use crate::cache::{CacheKey, QueryCache, SharedCache, keys};
use crate::commands::{self, EditError, GET_CATEGORIES};
use crate::clock::{SharedClock, SystemClock};
use crate::config::ClientConfig;
use crate::confirm::{ConfirmationGate, SkipPatternOperation, TimeBlockDeletion};
use crate::date::{CalendarWidget, DateCoordinator, WeekAnchor};
use crate::mutation::{MutationError, MutationPipeline};
use crate::rpc::{CommandClient, CommandError, CommandTransport, encode_args};
use crate::session::CalendarSession;
use crate::toast::{SharedToasts, ToastScheduler};

pub const GET_WEEK: &str = "get_week";
pub const GET_SKIPPED_APPS: &str = "get_skipped_apps";

/// Everything the client keeps for its lifetime. Built once at startup and
/// handed to each screen.
pub struct ClientState<T> {
    config: ClientConfig,
    clock: SharedClock,
    timezone: Tz,
    cache: SharedCache,
    toasts: SharedToasts,
    pipeline: Arc<MutationPipeline<T>>,
}

impl<T: CommandTransport> ClientState<T> {
    pub fn new(config: ClientConfig, clock: SharedClock, transport: T) -> Self {
        let timezone = config.resolve_timezone();
        let cache = QueryCache::shared();
        let toasts = ToastScheduler::shared(clock.clone(), config.toast_settings());
        let pipeline = Arc::new(MutationPipeline::new(
            CommandClient::new(transport),
            cache.clone(),
            toasts.clone(),
            config.mutation_settings(),
        ));
        info!(%timezone, "client state ready");
        Self {
            config,
            clock,
            timezone,
            cache,
            toasts,
            pipeline,
        }
    }

    pub fn with_system_clock(config: ClientConfig, transport: T) -> Self {
        Self::new(config, Arc::new(SystemClock), transport)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    pub fn toasts(&self) -> &SharedToasts {
        &self.toasts
    }

    pub fn pipeline(&self) -> &Arc<MutationPipeline<T>> {
        &self.pipeline
    }

    pub fn date_coordinator(&self) -> DateCoordinator {
        DateCoordinator::new(
            self.timezone,
            self.clock.clone(),
            self.config.suppression_window(),
        )
    }

    pub fn skip_pattern_gate(&self) -> ConfirmationGate<T, SkipPatternOperation> {
        ConfirmationGate::new(
            self.pipeline.clone(),
            SkipPatternOperation,
            self.clock.clone(),
        )
    }

    pub fn calendar_session<W: CalendarWidget>(&self, widget: W) -> CalendarSession<T, W> {
        let deletion =
            ConfirmationGate::new(self.pipeline.clone(), TimeBlockDeletion, self.clock.clone());
        CalendarSession::new(
            self.date_coordinator(),
            widget,
            self.pipeline.clone(),
            deletion,
        )
    }

    /// Time blocks of `week`, from cache unless the entry is missing or
    /// stale.
    #[instrument(skip(self), fields(week = %week.query_id()))]
    pub async fn load_week(&self, week: &WeekAnchor) -> Result<Vec<TimeBlockDto>, CommandError> {
        let payload = encode_args(&week.range())?;
        self.fetch(
            &CacheKey::from(keys::WEEK),
            &week.query_id(),
            GET_WEEK,
            payload,
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn load_skipped_apps(&self) -> Result<Vec<SkippedAppDto>, CommandError> {
        self.fetch(
            &CacheKey::from(keys::SKIPPED_APPS),
            keys::ALL,
            GET_SKIPPED_APPS,
            Value::Null,
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn load_categories(&self) -> Result<Vec<CategoryDto>, CommandError> {
        self.fetch(
            &CacheKey::from(keys::CATEGORIES),
            keys::ALL,
            GET_CATEGORIES,
            Value::Null,
        )
        .await
    }

    /// Rewrites one skipped-app pattern. The pattern is checked locally
    /// first.
    #[instrument(skip(self, app), fields(id = app.id))]
    pub async fn update_skipped_app(&self, app: &SkippedAppDto) -> Result<(), EditError> {
        let request = commands::update_skipped_app(app)?;
        self.pipeline.execute(request).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_skipped_app(&self, id: i64) -> Result<(), MutationError> {
        let request = commands::delete_skipped_app(id)?;
        self.pipeline.execute(request).await?;
        Ok(())
    }

    async fn fetch<R>(
        &self,
        key: &CacheKey,
        query: &str,
        command: &str,
        payload: Value,
    ) -> Result<R, CommandError>
    where
        R: DeserializeOwned,
    {
        let cached = {
            let cache = self.cache.lock();
            if cache.needs_fetch(key, query) {
                None
            } else {
                cache.read(key, query).map(|read| read.data)
            }
        };
        if let Some(data) = cached {
            debug!(%key, query, "serving cached query");
            return decode_cached(command, data);
        }

        let token = self.cache.lock().begin_fetch(key);
        let data = self.pipeline.client().call(command, payload).await?;
        self.cache
            .lock()
            .complete_fetch(key, query, data.clone(), token);
        decode_cached(command, data)
    }
}

fn decode_cached<R: DeserializeOwned>(command: &str, data: Value) -> Result<R, CommandError> {
    serde_json::from_value(data).map_err(|err| {
        CommandError::TransportFailure(format!("failed to decode {command} reply: {err}"))
    })
}
