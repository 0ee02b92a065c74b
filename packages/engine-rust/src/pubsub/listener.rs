use async_trait::async_trait;

use super::message::Message;

/// Callback invoked once for each message delivered to a subscription.
///
/// Invocations for one subscription are sequential, in publish order.
/// Returning `Err` or panicking is reported as a
/// [`DeliveryFailure`](super::DeliveryFailure) and does not stop later
/// deliveries.
///
/// Any `Fn(&Message) -> anyhow::Result<()>` closure is a listener.
#[async_trait]
pub trait MessageListener: Send + Sync + 'static {
    async fn on_message(&self, message: &Message) -> anyhow::Result<()>;
}

#[async_trait]
impl<F> MessageListener for F
where
    F: Fn(&Message) -> anyhow::Result<()> + Send + Sync + 'static,
{
    async fn on_message(&self, message: &Message) -> anyhow::Result<()> {
        (self)(message)
    }
}
