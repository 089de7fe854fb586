//! Bridges untyped wire requests to typed action handlers
//!
//! Actions are registered by name as closures. The closure's parameter
//! types declare the decoding contract: each wire argument is remarshalled
//! into its parameter type before the closure runs, so shape errors never
//! reach business logic. A closure registered with
//! [`Dispatcher::register_variadic`] collects every trailing argument into
//! its final `Vec<T>` parameter.

use crate::cpi::{remarshal, Request, Response, ResponseError};
use crate::{CpiError, Result};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use tracing::{debug, warn};

/// Number of arguments an action accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub required: usize,
    pub variadic: bool,
}

impl Arity {
    pub fn exact(required: usize) -> Self {
        Self {
            required,
            variadic: false,
        }
    }

    pub fn variadic(required: usize) -> Self {
        Self {
            required,
            variadic: true,
        }
    }

    pub fn check(&self, have: usize) -> Result<()> {
        if have < self.required {
            return Err(CpiError::NotEnoughArguments {
                have,
                want: self.required,
            });
        }

        if have > self.required && !self.variadic {
            return Err(CpiError::TooManyArguments {
                have,
                want: self.required,
            });
        }

        Ok(())
    }
}

/// What an action produced: an optional value and an optional error.
#[derive(Debug, Default)]
pub struct Outcome {
    pub result: Option<Value>,
    pub error: Option<CpiError>,
}

impl Outcome {
    pub fn into_response(self) -> Response {
        Response {
            result: self.result,
            error: self.error.as_ref().map(ResponseError::from),
            log: String::new(),
        }
    }
}

/// Result shapes an action may return.
///
/// `()` carries nothing, a bare [`Value`] is a result, `Option<CpiError>` is
/// an error alone, and `Result<T, E>` is the value-or-error pair.
pub trait IntoOutcome {
    fn into_outcome(self) -> Result<Outcome>;
}

impl IntoOutcome for () {
    fn into_outcome(self) -> Result<Outcome> {
        Ok(Outcome::default())
    }
}

impl IntoOutcome for Value {
    fn into_outcome(self) -> Result<Outcome> {
        Ok(Outcome {
            result: non_null(self),
            error: None,
        })
    }
}

impl IntoOutcome for Option<CpiError> {
    fn into_outcome(self) -> Result<Outcome> {
        Ok(Outcome {
            result: None,
            error: self,
        })
    }
}

impl<T, E> IntoOutcome for std::result::Result<T, E>
where
    T: Serialize,
    E: Into<CpiError>,
{
    fn into_outcome(self) -> Result<Outcome> {
        match self {
            Ok(value) => {
                let value = serde_json::to_value(value).map_err(CpiError::InvalidResult)?;
                Ok(Outcome {
                    result: non_null(value),
                    error: None,
                })
            }
            Err(err) => Ok(Outcome {
                result: None,
                error: Some(err.into()),
            }),
        }
    }
}

fn non_null(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        value => Some(value),
    }
}

type ActionFuture = BoxFuture<'static, Result<Outcome>>;

/// A closure with a fixed parameter list.
pub trait Handler<Args>: Send + Sync + 'static {
    fn arity(&self) -> Arity;

    /// Decodes every argument and, only if all succeed, invokes the closure.
    fn call(&self, args: Vec<Value>) -> Result<ActionFuture>;
}

/// A closure whose final `Vec<V>` parameter collects trailing arguments.
pub trait VariadicHandler<Args, V>: Send + Sync + 'static {
    fn arity(&self) -> Arity;

    fn call(&self, args: Vec<Value>) -> Result<ActionFuture>;
}

fn decode<T: DeserializeOwned>(position: usize, value: Value) -> Result<T> {
    remarshal(&value).map_err(|source| CpiError::InvalidArgument { position, source })
}

fn decode_next<T, I>(args: &mut I) -> Result<T>
where
    T: DeserializeOwned,
    I: Iterator<Item = (usize, Value)>,
{
    match args.next() {
        Some((position, value)) => decode(position, value),
        None => Err(CpiError::NotEnoughArguments { have: 0, want: 1 }),
    }
}

macro_rules! impl_handler {
    ($required:expr; $($ty:ident),*) => {
        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<F, Fut, $($ty,)*> Handler<($($ty,)*)> for F
        where
            F: Fn($($ty),*) -> Fut + Send + Sync + 'static,
            Fut: Future + Send + 'static,
            Fut::Output: IntoOutcome,
            $($ty: DeserializeOwned,)*
        {
            fn arity(&self) -> Arity {
                Arity::exact($required)
            }

            fn call(&self, args: Vec<Value>) -> Result<ActionFuture> {
                let mut args = args.into_iter().enumerate();
                $(let $ty: $ty = decode_next(&mut args)?;)*
                let fut = (self)($($ty),*);
                Ok(Box::pin(async move { fut.await.into_outcome() }))
            }
        }

        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<F, Fut, $($ty,)* V> VariadicHandler<($($ty,)*), V> for F
        where
            F: Fn($($ty,)* Vec<V>) -> Fut + Send + Sync + 'static,
            Fut: Future + Send + 'static,
            Fut::Output: IntoOutcome,
            $($ty: DeserializeOwned,)*
            V: DeserializeOwned,
        {
            fn arity(&self) -> Arity {
                Arity::variadic($required)
            }

            fn call(&self, args: Vec<Value>) -> Result<ActionFuture> {
                let mut args = args.into_iter().enumerate();
                $(let $ty: $ty = decode_next(&mut args)?;)*
                let rest = args
                    .map(|(position, value)| decode::<V>(position, value))
                    .collect::<Result<Vec<V>>>()?;
                let fut = (self)($($ty,)* rest);
                Ok(Box::pin(async move { fut.await.into_outcome() }))
            }
        }
    };
}

impl_handler!(0;);
impl_handler!(1; A1);
impl_handler!(2; A1, A2);
impl_handler!(3; A1, A2, A3);
impl_handler!(4; A1, A2, A3, A4);
impl_handler!(5; A1, A2, A3, A4, A5);
impl_handler!(6; A1, A2, A3, A4, A5, A6);

struct Action {
    arity: Arity,
    invoke: Box<dyn Fn(Vec<Value>) -> Result<ActionFuture> + Send + Sync>,
}

/// Registry of named actions.
#[derive(Default)]
pub struct Dispatcher {
    actions: HashMap<String, Action>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<Args, H>(&mut self, method: &str, handler: H) -> &mut Self
    where
        H: Handler<Args>,
    {
        let arity = handler.arity();
        self.actions.insert(
            method.to_string(),
            Action {
                arity,
                invoke: Box::new(move |args| handler.call(args)),
            },
        );
        self
    }

    pub fn register_variadic<Args, V, H>(&mut self, method: &str, handler: H) -> &mut Self
    where
        H: VariadicHandler<Args, V>,
    {
        let arity = handler.arity();
        self.actions.insert(
            method.to_string(),
            Action {
                arity,
                invoke: Box::new(move |args| handler.call(args)),
            },
        );
        self
    }

    pub fn arity(&self, method: &str) -> Option<Arity> {
        self.actions.get(method).map(|action| action.arity)
    }

    /// Runs the named action and packages what it returned.
    ///
    /// Arity, argument decoding and result encoding failures are returned as
    /// `Err` and the action is not invoked; errors the action itself returns
    /// are carried in the response envelope.
    pub async fn dispatch(&self, request: Request) -> Result<Response> {
        let action = self
            .actions
            .get(&request.method)
            .ok_or_else(|| CpiError::UnexpectedMethod(request.method.clone()))?;

        action.arity.check(request.args.len())?;

        debug!(
            "Dispatching {} with {} argument(s)",
            request.method,
            request.args.len()
        );

        let outcome = (action.invoke)(request.args)?.await?;

        if let Some(err) = &outcome.error {
            warn!("{} failed: {}", request.method, err);
        }

        Ok(outcome.into_response())
    }
}
