use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use conduit_types::errors::{ApplicationError, FieldError, Result};

use crate::{
    cqrs::{Request, RequestContext},
    pipeline::{Next, PipelineBehavior, Priority},
};

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is a valid regex")
});

/// Checks a request and reports every failing field. An empty list means valid.
pub trait Validator<R>: Send + Sync {
    fn validate(&self, request: &R) -> Vec<FieldError>;
}

impl<R, F> Validator<R> for F
where
    F: Fn(&R) -> Vec<FieldError> + Send + Sync,
{
    fn validate(&self, request: &R) -> Vec<FieldError> {
        self(request)
    }
}

/// Runs its validators before anything downstream. Any failure short-circuits
/// the pipeline with a single `Validation` error listing all failing fields.
pub struct ValidationBehavior<R: Request> {
    validators: Vec<Box<dyn Validator<R>>>,
}

impl<R: Request> ValidationBehavior<R> {
    pub fn new() -> Self {
        Self {
            validators: Vec::new(),
        }
    }

    pub fn with(mut self, validator: impl Validator<R> + 'static) -> Self {
        self.validators.push(Box::new(validator));
        self
    }

    pub fn validate(&self, request: &R) -> Vec<FieldError> {
        self.validators
            .iter()
            .flat_map(|validator| validator.validate(request))
            .collect()
    }
}

#[async_trait]
impl<R: Request> PipelineBehavior<R> for ValidationBehavior<R> {
    async fn handle(
        &self,
        request: &R,
        ctx: &RequestContext,
        next: Next<'_, R>,
    ) -> Result<R::Response> {
        let errors = self.validate(request);
        if !errors.is_empty() {
            debug!(
                correlation_id = %ctx.correlation_id(),
                request = ctx.short_name(),
                failures = errors.len(),
                "Request rejected by validation"
            );
            return Err(ApplicationError::Validation(errors));
        }

        next.run().await
    }

    fn priority(&self) -> Priority {
        Priority::VALIDATION
    }

    fn name(&self) -> &'static str {
        "ValidationBehavior"
    }
}

/// Accessor for a string field of a request.
pub type FieldAccessor<R> = fn(&R) -> &str;

enum Rule<R> {
    Required {
        field: &'static str,
        get: FieldAccessor<R>,
    },
    Email {
        field: &'static str,
        get: FieldAccessor<R>,
    },
    MaxLen {
        field: &'static str,
        get: FieldAccessor<R>,
        max: usize,
    },
    Must {
        field: &'static str,
        check: Box<dyn Fn(&R) -> bool + Send + Sync>,
        message: String,
    },
}

impl<R> Rule<R> {
    fn check(&self, request: &R) -> Option<FieldError> {
        match self {
            Rule::Required { field, get } => get(request)
                .trim()
                .is_empty()
                .then(|| FieldError::new(*field, "is required")),
            Rule::Email { field, get } => {
                let value = get(request).trim();
                // Emptiness is left to `required`.
                (!value.is_empty() && !EMAIL.is_match(value))
                    .then(|| FieldError::new(*field, "is not a valid email address"))
            }
            Rule::MaxLen { field, get, max } => (get(request).chars().count() > *max)
                .then(|| FieldError::new(*field, format!("must be at most {max} characters"))),
            Rule::Must {
                field,
                check,
                message,
            } => (!check(request)).then(|| FieldError::new(*field, message.clone())),
        }
    }
}

/// Declarative field rules, checked in declaration order.
///
/// ```ignore
/// let rules = Rules::<CreateUser>::new()
///     .required("first_name", |c| &c.first_name)
///     .email("email", |c| &c.email);
/// ```
pub struct Rules<R> {
    rules: Vec<Rule<R>>,
}

impl<R> Default for Rules<R> {
    fn default() -> Self {
        Self { rules: Vec::new() }
    }
}

impl<R> Rules<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, field: &'static str, get: FieldAccessor<R>) -> Self {
        self.rules.push(Rule::Required { field, get });
        self
    }

    pub fn email(mut self, field: &'static str, get: FieldAccessor<R>) -> Self {
        self.rules.push(Rule::Email { field, get });
        self
    }

    pub fn max_len(mut self, field: &'static str, get: FieldAccessor<R>, max: usize) -> Self {
        self.rules.push(Rule::MaxLen { field, get, max });
        self
    }

    pub fn must(
        mut self,
        field: &'static str,
        check: impl Fn(&R) -> bool + Send + Sync + 'static,
        message: impl Into<String>,
    ) -> Self {
        self.rules.push(Rule::Must {
            field,
            check: Box::new(check),
            message: message.into(),
        });
        self
    }
}

impl<R: Send + Sync> Validator<R> for Rules<R> {
    fn validate(&self, request: &R) -> Vec<FieldError> {
        self.rules
            .iter()
            .filter_map(|rule| rule.check(request))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{
        pipeline::Pipeline,
        test_utils::tests::{JournalHandler, Ping, entries, journal},
    };

    struct Signup {
        name: String,
        email: String,
        age: u8,
    }

    fn rules() -> Rules<Signup> {
        Rules::<Signup>::new()
            .required("name", |s| &s.name)
            .max_len("name", |s| &s.name, 5)
            .required("email", |s| &s.email)
            .email("email", |s| &s.email)
            .must("age", |s| s.age >= 18, "must be an adult")
    }

    fn signup(name: &str, email: &str, age: u8) -> Signup {
        Signup {
            name: name.to_string(),
            email: email.to_string(),
            age,
        }
    }

    #[test]
    fn test_valid_request_has_no_errors() {
        assert!(rules().validate(&signup("Ann", "ann@example.com", 30)).is_empty());
    }

    #[test]
    fn test_collects_every_failing_field() {
        let errors = rules().validate(&signup("", "bad-email", 12));

        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["name", "email", "age"]);
        assert_eq!(errors[1].message, "is not a valid email address");
        assert_eq!(errors[2].message, "must be an adult");
    }

    #[test]
    fn test_empty_email_is_only_reported_as_required() {
        let errors = rules().validate(&signup("Ann", "  ", 30));

        assert_eq!(errors, vec![FieldError::new("email", "is required")]);
    }

    #[test]
    fn test_max_len_counts_characters() {
        assert!(rules().validate(&signup("Zoë", "z@example.com", 30)).is_empty());

        let errors = rules().validate(&signup("Annabel", "a@example.com", 30));
        assert_eq!(errors[0].message, "must be at most 5 characters");
    }

    #[test]
    fn test_closures_are_validators() {
        let behavior = ValidationBehavior::<Ping>::new()
            .with(|ping: &Ping| {
                if ping.id == 0 {
                    vec![FieldError::new("id", "must not be zero")]
                } else {
                    vec![]
                }
            })
            .with(Rules::new().must("id", |ping: &Ping| ping.id < 100, "is too large"));

        assert_eq!(behavior.validate(&Ping { id: 0 }).len(), 1);
        assert_eq!(behavior.validate(&Ping { id: 500 }).len(), 1);
        assert!(behavior.validate(&Ping { id: 5 }).is_empty());
    }

    #[tokio::test]
    async fn test_invalid_request_never_reaches_handler() {
        let log = journal();
        let behavior = ValidationBehavior::<Ping>::new()
            .with(Rules::new().must("id", |ping: &Ping| ping.id != 0, "must not be zero"));
        let pipeline =
            Pipeline::<Ping>::new(Arc::new(JournalHandler::new(log.clone())), vec![Arc::new(behavior)]);
        let ctx = RequestContext::for_request::<Ping>(CancellationToken::new());

        let err = pipeline.execute(&Ping { id: 0 }, &ctx).await.unwrap_err();

        assert_eq!(err.field_errors(), &[FieldError::new("id", "must not be zero")]);
        assert!(entries(&log).is_empty());

        let response = pipeline.execute(&Ping { id: 1 }, &ctx).await.unwrap();
        assert_eq!(response, "pong 1");
    }
}
