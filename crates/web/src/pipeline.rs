//! The application pipeline.
//!
//! A [`Pipeline`] is everything one application registered, bundled into a
//! single object: route table, controllers, interceptors, chain overrides,
//! messages, templates, and configuration. There is no global registry;
//! two pipelines in one process do not see each other.
//!
//! The route table sits behind an `ArcSwap`, so a table rebuilt from a
//! changed routes file replaces the old one atomically. A table that
//! fails to parse or validate leaves the running table untouched.

use arc_swap::ArcSwap;
use http::Response;
use std::collections::HashMap;
use std::sync::Arc;
use tiller_http::{Dispatch, Request, ResponseBody};
use tracing::error;

use crate::binder::DateFormats;
use crate::config::AppConfig;
use crate::controller::Context;
use crate::error::Error;
use crate::filter::{Chain, MethodOverride, PanicGuard, ParamsStage, Stage};
use crate::filterconfig::{ConfiguringStage, FilterConfigurator};
use crate::flash::FlashStage;
use crate::i18n::{I18nStage, Messages};
use crate::intercept::{InterceptorStage, Interceptors, Target, When};
use crate::invoker::InvokerStage;
use crate::params::Params;
use crate::pool::Pool;
use crate::registry::{ControllerDescriptor, ControllerRegistry};
use crate::result::Reply;
use crate::route::ActionDefinition;
use crate::router::{Router, RouterStage};
use crate::session::SessionStage;
use crate::template::TemplateLoader;
use crate::validation::ValidationStage;

const PARAMS_POOL_CAP: usize = 64;

/// Builds a [`Pipeline`]. Everything is optional except routes that
/// resolve, which [`PipelineBuilder::build`] validates.
pub struct PipelineBuilder {
    config: AppConfig,
    registry: ControllerRegistry,
    interceptors: Interceptors,
    filters: FilterConfigurator,
    messages: Messages,
    routes: Option<(String, String)>,
    modules: HashMap<String, String>,
    templates: Option<Arc<dyn TemplateLoader>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        let config = AppConfig::default();
        Self {
            messages: Messages::new(&config.default_language),
            config,
            registry: ControllerRegistry::new(),
            interceptors: Interceptors::new(),
            filters: FilterConfigurator::new(),
            routes: None,
            modules: HashMap::new(),
            templates: None,
        }
    }

    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    pub fn controller(mut self, descriptor: ControllerDescriptor) -> Self {
        self.registry.register(descriptor);
        self
    }

    pub fn intercept(
        mut self,
        when: When,
        target: Target,
        func: impl Fn(&mut Context) -> Option<Reply> + Send + Sync + 'static,
    ) -> Self {
        self.interceptors.add(when, target, func);
        self
    }

    /// Record per-controller or per-action chain overrides.
    pub fn configure_filters(mut self, f: impl FnOnce(&mut FilterConfigurator)) -> Self {
        f(&mut self.filters);
        self
    }

    pub fn messages(mut self, messages: Messages) -> Self {
        self.messages = messages;
        self
    }

    /// The main route table. `source` labels parse errors.
    pub fn routes(mut self, source: &str, text: &str) -> Self {
        self.routes = Some((source.to_string(), text.to_string()));
        self
    }

    /// A named module table, spliced where the main table says `module:`.
    pub fn module(mut self, name: &str, text: &str) -> Self {
        self.modules.insert(name.to_string(), text.to_string());
        self
    }

    pub fn templates(mut self, loader: Arc<dyn TemplateLoader>) -> Self {
        self.templates = Some(loader);
        self
    }

    pub fn build(self) -> Result<Pipeline, Error> {
        let date_formats = Arc::new(DateFormats {
            date: self.config.date_format.clone(),
            datetimes: self.config.datetime_formats.clone(),
        });

        let config = Arc::new(self.config);
        let registry = Arc::new(self.registry);
        let interceptors = Arc::new(self.interceptors);
        let messages = Arc::new(self.messages);

        let router = match &self.routes {
            Some((source, text)) => Router::parse(source, text, &self.modules)?,
            None => Router::default(),
        };
        router.validate(&registry)?;
        let table = Arc::new(ArcSwap::from_pointee(router));

        let tail: Vec<Arc<dyn Stage>> = vec![
            Arc::new(ParamsStage),
            Arc::new(SessionStage::new(Arc::clone(&config))),
            Arc::new(FlashStage::new(Arc::clone(&config))),
            Arc::new(ValidationStage::new(Arc::clone(&config))),
            Arc::new(I18nStage::new(Arc::clone(&config), Arc::clone(&messages))),
            Arc::new(InterceptorStage::new(Arc::clone(&interceptors))),
            Arc::new(InvokerStage),
        ];
        let overrides = Arc::new(self.filters.build_overrides(&tail)?);

        let mut chain: Vec<Arc<dyn Stage>> = vec![
            Arc::new(PanicGuard),
            Arc::new(MethodOverride),
            Arc::new(RouterStage::new(Arc::clone(&table), Arc::clone(&registry))),
            Arc::new(ConfiguringStage::new(overrides)),
        ];
        chain.extend(tail);

        Ok(Pipeline {
            chain,
            table,
            registry,
            config,
            date_formats,
            modules: self.modules,
            templates: self.templates,
            params_pool: Pool::new(PARAMS_POOL_CAP),
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Pipeline {
    chain: Vec<Arc<dyn Stage>>,
    table: Arc<ArcSwap<Router>>,
    registry: Arc<ControllerRegistry>,
    config: Arc<AppConfig>,
    date_formats: Arc<DateFormats>,
    modules: HashMap<String, String>,
    templates: Option<Arc<dyn TemplateLoader>>,
    params_pool: Pool<Params>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &ControllerRegistry {
        &self.registry
    }

    /// Run one request through the stage chain and render the reply.
    pub fn dispatch(&self, request: Request) -> Response<ResponseBody> {
        let mut ctx = Context::new(request);
        ctx.params = self.params_pool.take(Params::new);
        ctx.params.date_formats = Arc::clone(&self.date_formats);

        Chain::new(&self.chain).next(&mut ctx);

        let reply = ctx.result.take().unwrap_or_else(|| {
            error!(action = ctx.action(), "request finished without a reply");
            Reply::server_error("The action produced no reply", None)
        });
        let mut response = reply.into_response(self.config.dev_mode, self.templates.as_deref());

        // explicit response state wins over whatever the reply rendered
        if let Some(status) = ctx.response.status {
            *response.status_mut() = status;
        }
        for (name, value) in ctx.response.headers.iter() {
            response.headers_mut().append(name.clone(), value.clone());
        }

        let mut params = std::mem::take(&mut ctx.params);
        params.reset();
        self.params_pool.put(params);

        response
    }

    /// Build a URL for an action against the current route table.
    pub fn reverse(
        &self,
        action: &str,
        args: &std::collections::BTreeMap<String, String>,
    ) -> Option<ActionDefinition> {
        self.table.load().reverse(action, args)
    }

    /// Swap in a new route table. On any error the running table stays.
    pub fn refresh_routes(&self, source: &str, text: &str) -> Result<(), Error> {
        let router = Router::parse(source, text, &self.modules)?;
        router.validate(&self.registry)?;
        self.table.store(Arc::new(router));
        Ok(())
    }
}

impl Dispatch for Pipeline {
    fn dispatch(&self, request: Request) -> Response<ResponseBody> {
        Pipeline::dispatch(self, request)
    }
}
