//! Domain models for subscription-service.

mod dates;
mod event;
mod patch;
mod payment;
mod plan;
mod subscription;
mod user;

pub use dates::{from_epoch_seconds, lenient_datetime};
pub use event::{GatewayEvent, LifecycleEvent, PaymentEntity, SubscriptionEntity};
pub use patch::{FieldUpdate, UpdateDocument};
pub use payment::{PaymentPatch, PaymentRecord, PaymentStatus};
pub use plan::{billing_cycle_count, SubscriptionPlan};
pub use subscription::{
    GatewaySubscriptionStatus, SubscriptionEventRecord, SubscriptionPatch, UserSubscription,
};
pub use user::{Role, SubscriptionStatus, User, UserPatch};
