//! Designated main thread
//!
//! A [`MainLooper`] turns the thread that creates it into the process's
//! coordinating thread. Other threads post closures to it through cloneable
//! [`MainHandle`]s, and the owning thread runs them from its loop. The
//! thread id doubles as the identity the [`BufferExecutor`](crate::BufferExecutor)
//! uses for its main-thread bypass.

use crate::executor::Work;
use crate::pool::panic_message;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::Instant;
use tracing::{error, trace};

enum Message {
    Run(Work),
    /// The last handle went away
    Released,
}

struct HandleInner {
    thread_id: ThreadId,
    sender: Sender<Message>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        let _ = self.sender.send(Message::Released);
    }
}

/// Cloneable handle for posting work to the main thread
#[derive(Clone)]
pub struct MainHandle {
    inner: Arc<HandleInner>,
}

impl MainHandle {
    /// Id of the main thread
    pub fn thread_id(&self) -> ThreadId {
        self.inner.thread_id
    }

    /// Whether the caller is the main thread
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.inner.thread_id
    }

    /// Queue `f` for the main thread; false once the looper is gone
    pub fn post<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.sender.send(Message::Run(Box::new(f))).is_ok()
    }

    /// Run `f` now when called on the main thread, otherwise post it
    pub fn execute_in_main_thread<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_current() {
            f();
            true
        } else {
            self.post(f)
        }
    }
}

impl std::fmt::Debug for MainHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainHandle")
            .field("thread_id", &self.inner.thread_id)
            .finish()
    }
}

/// Work loop of the main thread
///
/// Stays on the thread that created it.
pub struct MainLooper {
    thread_id: ThreadId,
    sender: Sender<Message>,
    receiver: Receiver<Message>,
    handle: Mutex<Weak<HandleInner>>,
    _local: PhantomData<*const ()>,
}

impl MainLooper {
    /// Make the calling thread the main thread
    pub fn new() -> Self {
        let (sender, receiver) = channel::unbounded();
        Self {
            thread_id: thread::current().id(),
            sender,
            receiver,
            handle: Mutex::new(Weak::new()),
            _local: PhantomData,
        }
    }

    /// Id of the main thread
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Handle for posting work here
    pub fn handle(&self) -> MainHandle {
        let mut slot = self.handle.lock();
        let inner = match slot.upgrade() {
            Some(inner) => inner,
            None => {
                let inner = Arc::new(HandleInner {
                    thread_id: self.thread_id,
                    sender: self.sender.clone(),
                });
                *slot = Arc::downgrade(&inner);
                inner
            }
        };
        MainHandle { inner }
    }

    fn has_handles(&self) -> bool {
        self.handle.lock().strong_count() > 0
    }

    /// Run everything posted so far without blocking; returns how many ran
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(message) = self.receiver.try_recv() {
            if let Message::Run(work) = message {
                run_work(work);
                ran += 1;
            }
        }
        ran
    }

    /// Run posted work until every handle is dropped or `deadline` passes
    pub fn run_until(&self, deadline: Instant) -> usize {
        let mut ran = 0;
        while self.has_handles() {
            match self.receiver.recv_deadline(deadline) {
                Ok(Message::Run(work)) => {
                    run_work(work);
                    ran += 1;
                }
                Ok(Message::Released) => {}
                Err(_) => return ran,
            }
        }
        ran + self.run_pending()
    }

    /// Run posted work until every handle is dropped
    pub fn run(&self) -> usize {
        let mut ran = 0;
        while self.has_handles() {
            match self.receiver.recv() {
                Ok(Message::Run(work)) => {
                    run_work(work);
                    ran += 1;
                }
                Ok(Message::Released) => {}
                Err(_) => break,
            }
        }
        trace!(ran, "Main looper finished");
        ran + self.run_pending()
    }
}

impl Default for MainLooper {
    fn default() -> Self {
        Self::new()
    }
}

fn run_work(work: Work) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(work)) {
        error!(panic = %panic_message(payload.as_ref()), "Main thread task panicked");
    }
}
