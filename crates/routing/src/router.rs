use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use tracing::{debug, info, warn};

use {
    crate::error::{Error, Result},
    relais_backends::{BackendClient, build_client},
    relais_common::{InboundMessage, MessageKind, ReplyPayload},
    relais_config::{PromptTemplates, RelaisConfig, RouteConfig, StabilizeConfig, SurfaceRoute},
    relais_media::{MediaStore, compress_to_budget},
    relais_surface::{StabilizeOptions, SurfaceDriver, SurfaceLock, await_reply},
};

enum GroupRoute {
    Api {
        client: Arc<dyn BackendClient>,
        templates: PromptTemplates,
    },
    Surface(SurfaceRoute),
}

/// Dispatches inbound messages to their configured reply path.
pub struct Router {
    routes: HashMap<String, GroupRoute>,
    /// Groups whose backend client could not be constructed at startup.
    skipped: Vec<(String, String)>,
    driver: Arc<dyn SurfaceDriver>,
    lock: SurfaceLock,
    media: Arc<MediaStore>,
    lock_timeout: Duration,
    stabilize: StabilizeOptions,
    max_image_bytes: u64,
}

fn stabilize_options(cfg: &StabilizeConfig) -> StabilizeOptions {
    StabilizeOptions {
        max_wait: cfg.max_wait(),
        poll_interval: cfg.poll_interval(),
        stable_checks: cfg.stable_checks,
        generating_markers: cfg.generating_markers.clone(),
    }
}

impl Router {
    /// Build the routing table, constructing one API client per API group.
    ///
    /// A group whose client cannot be built (bad backend id, missing key) is
    /// skipped with a warning rather than failing startup; its messages will
    /// be reported as not configured.
    pub fn new(
        config: &RelaisConfig,
        driver: Arc<dyn SurfaceDriver>,
        lock: SurfaceLock,
        media: Arc<MediaStore>,
    ) -> Self {
        let mut routes = HashMap::new();
        let mut skipped = Vec::new();

        for (group, group_cfg) in &config.groups {
            match &group_cfg.route {
                RouteConfig::Api(api) => match build_client(api) {
                    Ok(client) => {
                        info!(group, backend = %api.backend, "api route ready");
                        routes.insert(group.clone(), GroupRoute::Api {
                            client,
                            templates: api.templates.clone(),
                        });
                    },
                    Err(e) => {
                        warn!(group, error = %e, "skipping group, backend client unavailable");
                        skipped.push((group.clone(), e.to_string()));
                    },
                },
                RouteConfig::Surface(surface) => {
                    info!(group, surface = %surface.surface, "surface route ready");
                    routes.insert(group.clone(), GroupRoute::Surface(surface.clone()));
                },
            }
        }

        Self {
            routes,
            skipped,
            driver,
            lock,
            media,
            lock_timeout: config.surface.lock_timeout(),
            stabilize: stabilize_options(&config.surface.stabilize),
            max_image_bytes: config.media.max_image_kb * 1024,
        }
    }

    /// Groups dropped at startup, with the reason.
    #[must_use]
    pub fn skipped_groups(&self) -> &[(String, String)] {
        &self.skipped
    }

    /// Whether a group has a usable route.
    #[must_use]
    pub fn is_routable(&self, group: &str) -> bool {
        self.routes.contains_key(group)
    }

    /// Generate a reply for an inbound message.
    ///
    /// Does not deliver: the caller owns delivery so it can serialize chat
    /// sends separately from reply generation.
    pub async fn route(&self, message: &InboundMessage) -> Result<ReplyPayload> {
        let route = self
            .routes
            .get(&message.group)
            .ok_or_else(|| Error::NotConfigured {
                group: message.group.clone(),
            })?;

        match route {
            GroupRoute::Api { client, templates } => {
                self.route_api(message, client.as_ref(), templates).await
            },
            GroupRoute::Surface(surface) => self.route_surface(message, surface).await,
        }
    }

    async fn route_api(
        &self,
        message: &InboundMessage,
        client: &dyn BackendClient,
        templates: &PromptTemplates,
    ) -> Result<ReplyPayload> {
        let reply = match message.kind {
            MessageKind::Text => {
                let prompt = templates.render_text(&message.content);
                client.send_text(&prompt).await?
            },
            MessageKind::Image => {
                let image = self.prepare_image(&message.content, &message.group).await?;
                client.send_image(&templates.render_image(), &image).await?
            },
        };
        debug!(group = %message.group, backend = client.name(), "api reply generated");
        Ok(ReplyPayload::text(reply.text))
    }

    async fn route_surface(
        &self,
        message: &InboundMessage,
        route: &SurfaceRoute,
    ) -> Result<ReplyPayload> {
        // Image first: downloading and compressing needs no lock.
        let image = match message.kind {
            MessageKind::Text => None,
            MessageKind::Image => {
                Some(self.prepare_image(&message.content, &message.group).await?)
            },
        };

        let _guard = self.lock.acquire(&message.group, self.lock_timeout).await?;

        self.driver.switch_to(&route.surface).await?;
        let baseline = self.driver.reply_texts(&route.selectors.response).await?.len();

        let prompt = match (&message.kind, &image) {
            (MessageKind::Image, Some(path)) => {
                let upload = route.selectors.file_upload.as_deref().ok_or_else(|| {
                    relais_surface::Error::message(format!(
                        "group {} has an image message but no file_upload selector",
                        message.group
                    ))
                })?;
                self.driver.attach_image(upload, path).await?;
                route.templates.render_image()
            },
            _ => route.templates.render_text(&message.content),
        };
        self.driver.submit_prompt(&route.selectors.input, &prompt).await?;

        let text = await_reply(
            self.driver.as_ref(),
            &route.selectors.response,
            baseline,
            &self.stabilize,
        )
        .await?;
        debug!(group = %message.group, surface = %route.surface, "surface reply stabilized");
        Ok(ReplyPayload::text(text))
    }

    /// Resolve an image source to a local file within the size budget.
    async fn prepare_image(&self, source: &str, group: &str) -> Result<PathBuf> {
        let path = self
            .media
            .acquire(source, group)
            .await
            .map_err(Error::media)?;
        let max_bytes = self.max_image_bytes;
        tokio::task::spawn_blocking(move || compress_to_budget(&path, max_bytes))
            .await
            .map_err(Error::media)
    }
}
