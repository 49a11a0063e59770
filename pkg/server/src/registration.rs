use common::condvar::Condvar;

/// Tracks the number of handler calls currently in flight so `Server::stop`
/// can drain them before tearing down (§4.6 "drain in-flight requests").
pub(crate) struct InFlight {
    condvar: Condvar<usize>,
}

impl InFlight {
    pub fn new() -> Self {
        Self {
            condvar: Condvar::new(0),
        }
    }

    pub async fn enter(&self) {
        let mut count = self.condvar.lock().await;
        *count += 1;
    }

    pub async fn exit(&self) {
        let mut count = self.condvar.lock().await;
        *count -= 1;
        if *count == 0 {
            count.notify_all();
        }
    }

    pub async fn drain(&self) {
        loop {
            let count = self.condvar.lock().await;
            if *count == 0 {
                return;
            }
            count.wait(()).await;
        }
    }
}
