//! Declarative macros for ergonomic effect construction

/// Create an `Effect::Future` from an async block
///
/// The block evaluates to `Option<Action>`; `Some` is fed back into the reducer.
///
/// # Example
///
/// ```rust,ignore
/// use box_office_core::async_effect;
///
/// async_effect! {
///     let batch = provider.issue_tickets(order_id, items, buyer).await.ok()?;
///     Some(OrderAction::TicketsIssued { order_id, batch })
/// }
/// ```
#[macro_export]
macro_rules! async_effect {
    ($($body:tt)*) => {
        $crate::effect::Effect::Future(
            ::std::boxed::Box::pin(async move { $($body)* })
        )
    };
}

#[cfg(test)]
mod tests {
    use crate::effect::Effect;

    #[derive(Clone, Debug, PartialEq)]
    enum TestAction {
        Issued { count: u32 },
    }

    #[test]
    fn test_async_effect_macro() {
        let effect = async_effect! {
            Some(TestAction::Issued { count: 2 })
        };

        assert!(matches!(effect, Effect::Future(_)));
    }

    #[test]
    fn test_async_effect_produces_action() {
        let effect = async_effect!(Some(TestAction::Issued { count: 3 }));

        match effect {
            Effect::Future(fut) => {
                let produced = tokio_test::block_on(fut);
                assert_eq!(produced, Some(TestAction::Issued { count: 3 }));
            },
            Effect::None => unreachable!("async_effect! always builds a future"),
        }
    }
}
