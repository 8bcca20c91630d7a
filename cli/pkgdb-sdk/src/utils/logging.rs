//! Helpers for asserting on log output.

#[cfg(any(test, feature = "tests"))]
pub mod test_helpers {
    use std::fmt::Display;
    use std::sync::{Arc, Mutex, MutexGuard};

    /// Collects everything a subscriber writes
    #[derive(Clone, Debug, Default)]
    pub struct CollectingWriter {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl CollectingWriter {
        fn buffer(&self) -> MutexGuard<'_, Vec<u8>> {
            self.buffer
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
        }
    }

    impl Display for CollectingWriter {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", String::from_utf8_lossy(&self.buffer()))
        }
    }

    impl<'w> tracing_subscriber::fmt::MakeWriter<'w> for CollectingWriter {
        type Writer = <Mutex<Vec<u8>> as tracing_subscriber::fmt::MakeWriter<'w>>::Writer;

        fn make_writer(&'w self) -> Self::Writer {
            (*self.buffer).make_writer()
        }
    }

    /// A compact subscriber without timestamps or targets
    /// writing into the returned [CollectingWriter]
    pub fn test_subscriber() -> (impl tracing::Subscriber, CollectingWriter) {
        let writer = CollectingWriter::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(writer.clone())
            .compact()
            .without_time()
            .with_target(false)
            .finish();
        (subscriber, writer)
    }

    /// Run `f` and return its result along with what it logged on this thread
    pub fn captured_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
        let (subscriber, writer) = test_subscriber();
        let result = tracing::subscriber::with_default(subscriber, f);
        (result, writer.to_string())
    }
}
