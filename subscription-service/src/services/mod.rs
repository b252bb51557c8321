pub mod access;
pub mod accounts;
pub mod catalog;
pub mod lifecycle;
pub mod metrics;
pub mod mock_store;
pub mod orders;
pub mod provisioner;
pub mod razorpay;
pub mod repository;
pub mod webhook;

pub use access::AccessService;
pub use accounts::AccountService;
pub use catalog::PlanCatalog;
pub use lifecycle::SubscriptionLifecycle;
pub use metrics::{get_metrics, init_metrics};
pub use mock_store::MockRecordStore;
pub use orders::OrderService;
pub use provisioner::SubscriptionProvisioner;
pub use razorpay::RazorpayClient;
pub use repository::{MongoRecordStore, RecordStore};
pub use webhook::{WebhookOutcome, WebhookProcessor, WebhookVerifier};
