
#[cfg(test)]
pub mod tests {
    use crate::test_utils::tests::{setup_app, setup_app_with};
    use conduit_app::config::Config;
    use conduit_demo::users::{CreateUser, GetUser, UserCreated, UserDto};
    use conduit_types::errors::{ApplicationError, FieldError, Result};
    use std::time::Duration;

    fn john() -> CreateUser {
        CreateUser {
            first_name: "John".to_string(),
            last_name: "Doe".to_string(),
            email: "john.doe@example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_invalid_user_never_reaches_handler() {
        let app = setup_app();

        let err = app
            .mediator
            .send(CreateUser {
                first_name: String::new(),
                last_name: "Doe".to_string(),
                email: "bad-email".to_string(),
            })
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ApplicationError::Validation(vec![
                FieldError::new("first_name", "is required"),
                FieldError::new("email", "is not a valid email address"),
            ])
        );
        assert!(app.store.is_empty());
        // Validation sits outside the transaction: nothing was even started.
        assert_eq!(app.uow_provider.commits() + app.uow_provider.rollbacks(), 0);
    }

    #[tokio::test]
    async fn test_create_then_get_user() -> Result<()> {
        let app = setup_app();

        let id = app.mediator.send(john()).await?;
        let user = app.mediator.send(GetUser { id }).await?;

        assert_eq!(
            user,
            UserDto {
                id,
                first_name: "John".to_string(),
                last_name: "Doe".to_string(),
                email: "john.doe@example.com".to_string(),
            }
        );
        assert_eq!(app.uow_provider.commits(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_email_rolls_back() -> Result<()> {
        let app = setup_app();
        app.mediator.send(john()).await?;

        let err = app.mediator.send(john()).await.unwrap_err();

        assert_eq!(err.field_errors()[0].message, "is already registered");
        assert_eq!(app.uow_provider.commits(), 1);
        assert_eq!(app.uow_provider.rollbacks(), 1);
        assert_eq!(app.store.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_signups_with_one_email_create_one_user() {
        let app = setup_app();

        let (first, second) = tokio::join!(app.mediator.send(john()), app.mediator.send(john()));

        let mut outcomes = [first, second];
        outcomes.sort_by_key(|outcome| outcome.is_err());
        assert!(outcomes[0].is_ok());
        let Err(err) = &outcomes[1] else {
            panic!("both signups succeeded");
        };
        assert_eq!(err.field_errors()[0].message, "is already registered");
        assert_eq!(app.store.len(), 1);
    }

    #[tokio::test]
    async fn test_second_lookup_is_served_from_cache() -> Result<()> {
        let app = setup_app();
        let id = app.mediator.send(john()).await?;

        let first = app.mediator.send(GetUser { id }).await?;
        // Only the cached copy can still answer once the user is gone.
        app.store.remove(id);
        let second = app.mediator.send(GetUser { id }).await?;

        assert_eq!(first, second);
        assert_eq!(app.cache.len(), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_expires() -> Result<()> {
        let app = setup_app_with(Config::default().with_cache_ttl(Duration::from_secs(1)));
        let id = app.mediator.send(john()).await?;
        app.mediator.send(GetUser { id }).await?;

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(app.cache.purge_expired(), 1);
        assert!(app.cache.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found_and_not_cached() {
        let app = setup_app();

        let err = app.mediator.send(GetUser { id: 42 }).await.unwrap_err();

        assert_eq!(err, ApplicationError::not_found("User 42"));
        assert!(app.cache.is_empty());
    }

    #[tokio::test]
    async fn test_user_created_reaches_every_handler() -> Result<()> {
        let app = setup_app();
        let id = app.mediator.send(john()).await?;

        let report = app
            .mediator
            .publish(UserCreated {
                id,
                email: "john.doe@example.com".to_string(),
            })
            .await;

        assert_eq!(report.handled, 2);
        assert!(report.is_clean());
        assert_eq!(
            app.audit.entries(),
            vec![
                "welcome email to john.doe@example.com".to_string(),
                format!("user {id} created"),
            ]
        );
        Ok(())
    }
}
