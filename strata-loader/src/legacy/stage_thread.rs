use crossbeam_channel::{Receiver, Sender};
use std::thread::JoinHandle;

// Thread that takes messages out of its input channel and ends when the finish channel is
// signalled or every sender is gone
pub(super) struct StageThread {
    name: String,
    finish_tx: Sender<()>,
    join_handle: Option<JoinHandle<()>>,
}

impl StageThread {
    pub(super) fn new<M, F>(
        name: &str,
        request_rx: Receiver<M>,
        mut handle_request: F,
    ) -> std::io::Result<Self>
    where
        M: Send + 'static,
        F: FnMut(M) + Send + 'static,
    {
        let (finish_tx, finish_rx) = crossbeam_channel::bounded(1);
        let thread_name = name.to_string();
        let join_handle = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                profiling::register_thread!(&thread_name);
                loop {
                    crossbeam_channel::select! {
                        recv(request_rx) -> msg => {
                            match msg {
                                Ok(msg) => handle_request(msg),
                                Err(_) => return,
                            }
                        },
                        recv(finish_rx) -> _msg => {
                            return;
                        }
                    }
                }
            })?;

        Ok(StageThread {
            name: name.to_string(),
            finish_tx,
            join_handle: Some(join_handle),
        })
    }

    pub(super) fn signal_finish(&self) {
        // Fails only if the thread already exited
        let _ = self.finish_tx.send(());
    }

    pub(super) fn join(&mut self) {
        if let Some(join_handle) = self.join_handle.take() {
            if join_handle.join().is_err() {
                log::error!("{} thread panicked", self.name);
            }
        }
    }
}
