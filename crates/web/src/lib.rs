//! The tiller MVC dispatch core.
//!
//! An inbound request is adapted into a [`Context`], then pushed through an
//! ordered chain of named [`Stage`]s: panic guard, method override, router,
//! per-action chain overrides, params decoding, session, flash, validation,
//! i18n, interceptors, and finally the action invoker. Each stage either
//! calls the remainder of the chain or short-circuits by setting a
//! [`Reply`].
//!
//! The [`Pipeline`] owns everything an application registers: the route
//! table (hot-swappable), the controller registry, interceptors, filter
//! overrides, and configuration. It implements the transport's dispatch
//! contract, so any adapter in `tiller-http` can drive it.

mod binder;
mod config;
mod controller;
mod error;
mod filter;
mod filterconfig;
mod flash;
mod i18n;
mod intercept;
mod invoker;
mod params;
mod pipeline;
mod pool;
mod registry;
mod result;
mod route;
mod router;
mod session;
mod template;
mod util;
mod validation;

pub use binder::{FromParams, IntoParams, bind_field, unbind};
pub use config::AppConfig;
pub use controller::{Context, ResponseState};
pub use error::Error;
pub use filter::{Chain, MethodOverride, PanicGuard, ParamsStage, Stage, names};
pub use filterconfig::{ConfiguringStage, FilterConfigurator, SplicePoint};
pub use flash::{Flash, FlashStage};
pub use i18n::{I18nStage, Messages};
pub use intercept::{InterceptorStage, Interceptors, Target, When};
pub use invoker::InvokerStage;
pub use params::{Params, Values};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use pool::Pool;
pub use registry::{
    ControllerBuilder, ControllerDescriptor, ControllerRegistry, Handler, Hook, HookSet, MethodDescriptor,
};
pub use result::Reply;
pub use route::{ActionDefinition, NOT_FOUND_ACTION, Route, RouteMatch};
pub use router::{Router, RouterStage};
pub use session::{Session, SessionStage};
pub use template::{RenderError, Template, TemplateLoader};
pub use validation::{Validation, ValidationError, ValidationStage};
