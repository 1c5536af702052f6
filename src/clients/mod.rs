pub mod firestore_client;
pub mod pubsub_client;

pub use firestore_client::{DocumentMirror, FirestoreMirror, MemoryMirror};
pub use pubsub_client::{GooglePubSubPublisher, MemoryPublisher, Publisher};
