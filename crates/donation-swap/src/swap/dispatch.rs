//! JSON command dispatch.
//!
//! Both API surfaces take `{command, args}` payloads and answer with a
//! `(success, result)` pair. The command set is a fixed registry built at
//! startup; there is no reflection and nothing outside the registry is
//! callable. The anonymous surface masks internal failures behind a
//! generic message, while the admin surface reports errors verbatim.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};

use crate::swap::repository::{AdminDirectory, StoreError};
use crate::swap::service::{CreateOfferRequest, SwapError, SwapService};

pub struct CommandContext {
    pub caller_ip: String,
}

type Handler =
    Box<dyn Fn(&SwapService, &CommandContext, Value) -> Result<Value, SwapError> + Send + Sync>;

pub struct CommandRegistry {
    handlers: HashMap<&'static str, Handler>,
}

#[derive(Deserialize)]
struct SecretArgs {
    secret: String,
}

#[derive(Deserialize)]
struct OfferSecretArgs {
    offer_secret: String,
}

#[derive(Deserialize)]
struct DeclineArgs {
    secret: String,
    #[serde(default)]
    feedback: Option<String>,
}

#[derive(Deserialize)]
struct ContactArgs {
    #[serde(default)]
    captcha_response: Option<String>,
    message: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Deserialize)]
struct ScoresArgs {
    offer_id: u32,
}

#[derive(Deserialize)]
struct CreateMatchArgs {
    offer_a: u32,
    offer_b: u32,
}

fn parse<T: DeserializeOwned>(args: Value) -> Result<T, SwapError> {
    serde_json::from_value(args).map_err(|err| SwapError::InvalidArguments(err.to_string()))
}

fn respond<T: Serialize>(value: T) -> Result<Value, SwapError> {
    serde_json::to_value(value)
        .map_err(|err| SwapError::Store(StoreError::Unavailable(err.to_string())))
}

impl CommandRegistry {
    fn register(&mut self, name: &'static str, handler: Handler) {
        self.handlers.insert(name, handler);
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// The anonymous donor-facing command set.
    pub fn engine() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
        };
        registry.register(
            "get_info",
            Box::new(|service, ctx, _args| respond(service.reference_info(&ctx.caller_ip)?)),
        );
        registry.register(
            "validate_offer",
            Box::new(|service, _ctx, args| {
                let request: CreateOfferRequest = parse(args)?;
                respond(json!({ "problem": service.validate_offer(&request) }))
            }),
        );
        registry.register(
            "create_offer",
            Box::new(|service, ctx, args| {
                let request: CreateOfferRequest = parse(args)?;
                match service.create_offer(request, &ctx.caller_ip)? {
                    Some(offer) => respond(json!({ "offer_secret": offer.secret })),
                    None => Ok(Value::Null),
                }
            }),
        );
        registry.register(
            "confirm_offer",
            Box::new(|service, _ctx, args| {
                let args: OfferSecretArgs = parse(args)?;
                respond(service.confirm_offer(&args.offer_secret)?)
            }),
        );
        registry.register(
            "delete_offer",
            Box::new(|service, _ctx, args| {
                let args: OfferSecretArgs = parse(args)?;
                service.delete_offer(&args.offer_secret)?;
                Ok(Value::Null)
            }),
        );
        registry.register(
            "get_match",
            Box::new(|service, _ctx, args| {
                let args: SecretArgs = parse(args)?;
                respond(service.get_match(&args.secret)?)
            }),
        );
        registry.register(
            "approve_match",
            Box::new(|service, _ctx, args| {
                let args: SecretArgs = parse(args)?;
                service.approve_match(&args.secret)?;
                Ok(Value::Null)
            }),
        );
        registry.register(
            "decline_match",
            Box::new(|service, _ctx, args| {
                let args: DeclineArgs = parse(args)?;
                service.decline_match(&args.secret, args.feedback.as_deref().unwrap_or(""))?;
                Ok(Value::Null)
            }),
        );
        registry.register(
            "send_contact_message",
            Box::new(|service, ctx, args| {
                let args: ContactArgs = parse(args)?;
                service.send_contact_message(
                    args.captcha_response.as_deref(),
                    &args.message,
                    args.name.as_deref(),
                    args.email.as_deref(),
                    &ctx.caller_ip,
                )?;
                Ok(Value::Null)
            }),
        );
        registry
    }

    /// The operator command set; session-gated via [`AdminDirectory`].
    pub fn admin() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
        };
        registry.register(
            "unmatched_offers",
            Box::new(|service, _ctx, _args| respond(service.unmatched_offer_views()?)),
        );
        registry.register(
            "match_scores",
            Box::new(|service, _ctx, args| {
                let args: ScoresArgs = parse(args)?;
                respond(service.match_scores(args.offer_id)?)
            }),
        );
        registry.register(
            "create_match",
            Box::new(|service, _ctx, args| {
                let args: CreateMatchArgs = parse(args)?;
                let record = service.create_match(args.offer_a, args.offer_b)?;
                respond(json!({ "match_id": record.id.0 }))
            }),
        );
        registry
    }

    /// Anonymous dispatch: user-facing errors travel verbatim, everything
    /// else is reduced to a generic message so store internals never leak.
    pub fn dispatch(
        &self,
        service: &SwapService,
        ctx: &CommandContext,
        command: &str,
        args: Value,
    ) -> (bool, Value) {
        let Some(handler) = self.handlers.get(command) else {
            return (false, json!("unknown command"));
        };
        match handler(service, ctx, args) {
            Ok(result) => (true, result),
            Err(err) if err.is_user_facing() => (false, json!(err.to_string())),
            Err(err) => {
                error!(command, error = %err, "command failed");
                (false, json!("internal error"))
            }
        }
    }

    /// Operator dispatch: requires a valid admin session and reports
    /// failures verbatim.
    pub fn dispatch_admin(
        &self,
        service: &SwapService,
        admins: &dyn AdminDirectory,
        session_secret: &str,
        ctx: &CommandContext,
        command: &str,
        args: Value,
    ) -> (bool, Value) {
        let Some(admin) = admins.by_session(session_secret) else {
            return (false, json!("not authorized"));
        };
        let Some(handler) = self.handlers.get(command) else {
            return (false, json!("unknown command"));
        };
        info!(admin = %admin.email, command, "admin command");
        match handler(service, ctx, args) {
            Ok(result) => (true, result),
            Err(err) => (false, json!(err.to_string())),
        }
    }
}
