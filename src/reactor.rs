//! Tokio-backed implementation of the PulseAudio mainloop API.
//!
//! libpulse never runs its own poll loop here. Every io, timer and defer
//! source the library registers lands in a registry owned by [`PulseReactor`],
//! and [`PulseReactor::tick`] translates tokio readiness into the callback
//! invocations libpulse expects. Running the context this way keeps the whole
//! daemon on one thread: the display connection's descriptor is simply
//! another [`AsyncFd`] polled by the same reactor.
//!
//! The design follows Daniel De Graaf's pulse-tokio adapter
//! (<https://github.com/danieldg/pulse-binding-rust/tree/master/pulse-tokio>,
//! MIT OR Apache-2.0).

#![allow(unsafe_code)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::{
    cell::{Cell, UnsafeCell},
    future::{Future, poll_fn},
    os::raw::c_void,
    os::unix::io::{AsRawFd, RawFd},
    pin::Pin,
    ptr,
    rc::{Rc, Weak},
    task::{Context as TaskContext, Poll, Waker},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use libc::timeval;
use libpulse_binding::{
    context::{self, Context},
    def::{Retval, RetvalActual},
    mainloop::{
        api::{
            DeferEventCb, DeferEventDestroyCb, IoEventCb, IoEventDestroyCb,
            Mainloop as MainloopTrait, MainloopApi, MainloopInnerType, MainloopInternalType,
            TimeEventCb, TimeEventDestroyCb,
        },
        events::{
            deferred::DeferEventInternal,
            io::{FlagSet as IoFlags, IoEventInternal},
            timer::TimeEventInternal,
        },
    },
};
use tokio::io::unix::AsyncFd;

/// Minimal [`AsRawFd`] wrapper for descriptors owned elsewhere.
pub(crate) struct Fd(pub(crate) RawFd);

impl AsRawFd for Fd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

/// A descriptor libpulse wants watched for readiness.
struct IoSource {
    owner: Weak<Registry>,
    fd: RawFd,
    watcher: Cell<Option<AsyncFd<Fd>>>,
    interest: Cell<IoFlags>,
    dead: Cell<bool>,
    cb: Option<IoEventCb>,
    userdata: *mut c_void,
    destroy: Cell<Option<IoEventDestroyCb>>,
}

/// A wall-clock deadline libpulse wants a callback at.
struct TimerSource {
    owner: Weak<Registry>,
    deadline: Cell<Option<Duration>>,
    dead: Cell<bool>,
    cb: Option<TimeEventCb>,
    userdata: *mut c_void,
    destroy: Cell<Option<TimeEventDestroyCb>>,
}

/// A callback libpulse wants run on every loop iteration while enabled.
struct DeferSource {
    owner: Weak<Registry>,
    enabled: Cell<bool>,
    dead: Cell<bool>,
    cb: Option<DeferEventCb>,
    userdata: *mut c_void,
    destroy: Cell<Option<DeferEventDestroyCb>>,
}

trait Source {
    fn is_dead(&self) -> bool;
    fn notify_destroy(&self, api: &MainloopApi, ptr: *mut Self);
}

macro_rules! impl_source {
    ($ty:ty, $internal:ty) => {
        impl Source for $ty {
            fn is_dead(&self) -> bool {
                self.dead.get()
            }

            fn notify_destroy(&self, api: &MainloopApi, ptr: *mut Self) {
                if let Some(cb) = self.destroy.get() {
                    cb(api, ptr.cast::<$internal>(), self.userdata);
                }
            }
        }
    };
}

impl_source!(IoSource, IoEventInternal);
impl_source!(TimerSource, TimeEventInternal);
impl_source!(DeferSource, DeferEventInternal);

/// The state structure handed to libpulse through the api pointer.
pub struct Registry {
    api: MainloopApi,
    ios: UnsafeCell<Vec<*mut IoSource>>,
    timers: UnsafeCell<Vec<*mut TimerSource>>,
    defers: UnsafeCell<Vec<*mut DeferSource>>,
    sleep: UnsafeCell<Option<tokio::time::Sleep>>,
    waker: Cell<Option<Waker>>,
    quit: Cell<Option<RetvalActual>>,
}

/// Single-threaded event loop driving a PulseAudio context through tokio.
pub struct PulseReactor {
    registry: Rc<Registry>,
}

impl MainloopTrait for PulseReactor {
    type MI = Registry;

    fn inner(&self) -> Rc<Registry> {
        Rc::clone(&self.registry)
    }
}

impl MainloopInternalType for Registry {}

impl MainloopInnerType for Registry {
    type I = Self;

    fn get_ptr(&self) -> *mut Self {
        panic!("not well-defined for a foreign mainloop and never called by libpulse")
    }

    fn get_api_ptr(&self) -> *const MainloopApi {
        &self.api
    }

    fn get_api(&self) -> &MainloopApi {
        &self.api
    }

    fn supports_rtclock(&self) -> bool {
        false
    }
}

impl Default for PulseReactor {
    fn default() -> Self {
        Self::new()
    }
}

impl PulseReactor {
    /// Create a reactor ready to host a [`Context`].
    ///
    /// # Panics
    /// Panics if the registry cannot be initialized.
    pub fn new() -> Self {
        let mut registry = Rc::new(Registry {
            api: MainloopApi {
                userdata: ptr::null_mut(),
                io_new: Some(Registry::io_new),
                io_enable: Some(Registry::io_enable),
                io_free: Some(Registry::io_free),
                io_set_destroy: Some(Registry::io_set_destroy),
                time_new: Some(Registry::time_new),
                time_restart: Some(Registry::time_restart),
                time_free: Some(Registry::time_free),
                time_set_destroy: Some(Registry::time_set_destroy),
                defer_new: Some(Registry::defer_new),
                defer_enable: Some(Registry::defer_enable),
                defer_free: Some(Registry::defer_free),
                defer_set_destroy: Some(Registry::defer_set_destroy),
                quit: Some(Registry::quit),
            },
            ios: UnsafeCell::new(Vec::new()),
            timers: UnsafeCell::new(Vec::new()),
            defers: UnsafeCell::new(Vec::new()),
            sleep: UnsafeCell::new(None),
            waker: Cell::new(None),
            quit: Cell::new(None),
        });
        let inner = Rc::get_mut(&mut registry).expect("freshly created registry is unshared");
        inner.api.userdata = (inner as *mut Registry).cast::<c_void>();
        // Leaked weak reference reconstituted in from_api and Registry::drop.
        let _cyclic = Rc::downgrade(&registry).into_raw();
        PulseReactor { registry }
    }

    /// Run registered callbacks once and park wakers for the rest.
    ///
    /// `Ready(Some(..))` means libpulse asked the loop to quit; `Ready(None)`
    /// means at least one callback fired and the caller should poll again.
    ///
    /// # Panics
    /// Panics if the system clock is before the epoch or a descriptor cannot
    /// be registered with tokio.
    pub fn tick(&mut self, cx: &mut TaskContext) -> Poll<Option<Retval>> {
        let registry = Rc::clone(&self.registry);
        let api = &registry.api;
        let entered = tokio::time::Instant::now();
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before the unix epoch");
        registry.waker.set(Some(cx.waker().clone()));

        let mut fired = false;
        let mut next_deadline: Option<Duration> = None;

        // Defer events run on every iteration until disabled or freed.
        let mut i = 0;
        while let Some(item) = sweep_and_get(api, &registry.defers, i) {
            i += 1;
            let defer = unsafe { &*item };
            if !defer.enabled.get() {
                continue;
            }
            if let Some(cb) = defer.cb {
                fired = true;
                cb(api, item.cast::<DeferEventInternal>(), defer.userdata);
            }
        }

        let mut i = 0;
        while let Some(item) = sweep_and_get(api, &registry.timers, i) {
            i += 1;
            let timer = unsafe { &*item };
            let Some(cb) = timer.cb else { continue };
            match timer.deadline.take() {
                Some(due) if due <= wall => {
                    fired = true;
                    let tv = timeval {
                        tv_sec: due.as_secs() as i64,
                        tv_usec: i64::from(due.subsec_micros()),
                    };
                    cb(api, item.cast::<TimeEventInternal>(), &tv, timer.userdata);
                }
                pending => timer.deadline.set(pending),
            }
            // The callback may have restarted the timer; re-read the slot.
            if let Some(due) = timer.deadline.get() {
                next_deadline = Some(next_deadline.map_or(due, |d| d.min(due)));
            }
        }

        let mut i = 0;
        while let Some(item) = sweep_and_get(api, &registry.ios, i) {
            i += 1;
            let io = unsafe { &*item };
            let Some(cb) = io.cb else { continue };
            let mut watcher = io.watcher.take();
            let afd = watcher.get_or_insert_with(|| {
                AsyncFd::new(Fd(io.fd)).expect("failed to register descriptor with tokio")
            });

            // FlagSet is neither Copy nor PartialEq; duplicate it out of the
            // cell by pointer read (it is a plain bit set with no drop glue).
            let wanted = unsafe { io.interest.as_ptr().read() };
            let mut ready = IoFlags::NULL;
            let mut read_guard = None;
            let mut write_guard = None;
            if wanted.contains(IoFlags::INPUT) {
                match afd.poll_read_ready(cx) {
                    Poll::Ready(Ok(guard)) => {
                        ready |= IoFlags::INPUT;
                        read_guard = Some(guard);
                    }
                    Poll::Ready(Err(_)) => ready |= IoFlags::ERROR,
                    Poll::Pending => {}
                }
            }
            if wanted.contains(IoFlags::OUTPUT) {
                match afd.poll_write_ready(cx) {
                    Poll::Ready(Ok(guard)) => {
                        ready |= IoFlags::OUTPUT;
                        write_guard = Some(guard);
                    }
                    Poll::Ready(Err(_)) => ready |= IoFlags::ERROR,
                    Poll::Pending => {}
                }
            }
            if ready.is_empty() {
                io.watcher.set(watcher);
                continue;
            }

            fired = true;
            cb(api, item.cast::<IoEventInternal>(), io.fd, ready, io.userdata);

            if io.dead.get() {
                // Freed inside the callback; let the watcher drop with the
                // guards and reap the source on the next sweep.
                continue;
            }

            // The callback drained what it wanted. Re-check the descriptor
            // with a zero timeout so tokio's cached readiness matches the
            // kernel's view, otherwise a half-drained fd would wake us
            // forever or never.
            let mut pfd = libc::pollfd {
                fd: io.fd,
                events: 0,
                revents: 0,
            };
            if read_guard.is_some() {
                pfd.events |= libc::POLLIN;
            }
            if write_guard.is_some() {
                pfd.events |= libc::POLLOUT;
            }
            unsafe {
                libc::poll(&mut pfd, 1, 0);
            }
            if let Some(mut guard) = read_guard {
                if pfd.revents & libc::POLLIN != 0 {
                    guard.retain_ready();
                } else {
                    guard.clear_ready();
                }
            }
            if let Some(mut guard) = write_guard {
                if pfd.revents & libc::POLLOUT != 0 {
                    guard.retain_ready();
                } else {
                    guard.clear_ready();
                }
            }
            io.watcher.set(watcher);
        }

        if let Some(rv) = registry.quit.take() {
            return Poll::Ready(Some(Retval(rv)));
        }
        if fired {
            return Poll::Ready(None);
        }

        // Nothing fired; arm a sleep for the earliest timer deadline.
        let mut sleep = unsafe { Pin::new_unchecked(&mut *registry.sleep.get()) };
        match next_deadline {
            Some(due) => {
                let delay = due.saturating_sub(wall);
                sleep.set(Some(tokio::time::sleep_until(entered + delay)));
                if let Some(Poll::Ready(())) = sleep.as_mut().as_pin_mut().map(|f| f.poll(cx)) {
                    sleep.set(None);
                    return Poll::Ready(None);
                }
            }
            None => sleep.set(None),
        }
        Poll::Pending
    }

    /// Drive the loop until the context leaves the connecting states.
    ///
    /// # Errors
    /// Returns the retval if libpulse quits the loop before the context
    /// settles.
    pub async fn wait_for_ready(&mut self, ctx: &Context) -> Result<context::State, Retval> {
        loop {
            if let Some(rv) = poll_fn(|cx| self.tick(cx)).await {
                return Err(rv);
            }
            match ctx.get_state() {
                s @ (context::State::Ready
                | context::State::Failed
                | context::State::Terminated) => return Ok(s),
                _ => {}
            }
        }
    }

    /// Drive the loop until libpulse requests a quit.
    pub async fn run(&mut self) -> Retval {
        loop {
            if let Some(rv) = poll_fn(|cx| self.tick(cx)).await {
                return rv;
            }
        }
    }
}

/// Reap dead sources at `index` (running their destroy callbacks), then
/// return the live source now at that position, if any.
fn sweep_and_get<T: Source>(
    api: &MainloopApi,
    list: &UnsafeCell<Vec<*mut T>>,
    index: usize,
) -> Option<*mut T> {
    loop {
        let items = unsafe { &mut *list.get() };
        if index >= items.len() {
            return None;
        }
        let item = items[index];
        if unsafe { (*item).is_dead() } {
            items.swap_remove(index);
            let dead = unsafe { Box::from_raw(item) };
            dead.notify_destroy(api, item);
            continue;
        }
        return Some(item);
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        unsafe {
            drop(Weak::from_raw(self.api.userdata as *const Registry));
            for item in self.ios.get_mut().drain(..) {
                drop(Box::from_raw(item));
            }
            for item in self.timers.get_mut().drain(..) {
                drop(Box::from_raw(item));
            }
            for item in self.defers.get_mut().drain(..) {
                drop(Box::from_raw(item));
            }
        }
    }
}

impl Registry {
    unsafe fn from_api(api: *const MainloopApi) -> Rc<Self> {
        let weak = unsafe { Weak::from_raw((*api).userdata as *const Registry) };
        let registry = weak.upgrade();
        let _ = weak.into_raw();
        registry.expect("mainloop registry freed while libpulse still holds the api")
    }

    fn adopt<T>(&self, list: &UnsafeCell<Vec<*mut T>>, source: Box<T>) -> *mut T {
        let item = Box::into_raw(source);
        unsafe { &mut *list.get() }.push(item);
        self.wake();
        item
    }

    fn wake(&self) {
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }

    fn wake_owner(owner: &Weak<Registry>) {
        if let Some(registry) = owner.upgrade() {
            registry.wake();
        }
    }

    extern "C" fn io_new(
        a: *const MainloopApi,
        fd: i32,
        events: IoFlags,
        cb: Option<IoEventCb>,
        userdata: *mut c_void,
    ) -> *mut IoEventInternal {
        unsafe {
            let registry = Registry::from_api(a);
            let item = registry.adopt(
                &registry.ios,
                Box::new(IoSource {
                    owner: Rc::downgrade(&registry),
                    fd,
                    watcher: Cell::new(None),
                    interest: Cell::new(events),
                    dead: Cell::new(false),
                    cb,
                    userdata,
                    destroy: Cell::new(None),
                }),
            );
            item.cast()
        }
    }

    extern "C" fn io_enable(e: *mut IoEventInternal, events: IoFlags) {
        unsafe {
            let io = &*e.cast::<IoSource>();
            io.interest.set(events);
            Registry::wake_owner(&io.owner);
        }
    }

    extern "C" fn io_free(e: *mut IoEventInternal) {
        unsafe {
            let io = &*e.cast::<IoSource>();
            io.dead.set(true);
            io.watcher.set(None);
        }
    }

    extern "C" fn io_set_destroy(e: *mut IoEventInternal, cb: Option<IoEventDestroyCb>) {
        unsafe {
            (*e.cast::<IoSource>()).destroy.set(cb);
        }
    }

    extern "C" fn time_new(
        a: *const MainloopApi,
        tv: *const timeval,
        cb: Option<TimeEventCb>,
        userdata: *mut c_void,
    ) -> *mut TimeEventInternal {
        unsafe {
            let registry = Registry::from_api(a);
            let tv = tv.read();
            let deadline =
                Duration::from_secs(tv.tv_sec as u64) + Duration::from_micros(tv.tv_usec as u64);
            let item = registry.adopt(
                &registry.timers,
                Box::new(TimerSource {
                    owner: Rc::downgrade(&registry),
                    deadline: Cell::new(Some(deadline)),
                    dead: Cell::new(false),
                    cb,
                    userdata,
                    destroy: Cell::new(None),
                }),
            );
            item.cast()
        }
    }

    extern "C" fn time_restart(e: *mut TimeEventInternal, tv: *const timeval) {
        unsafe {
            let timer = &*e.cast::<TimerSource>();
            let tv = tv.read();
            timer.deadline.set(Some(
                Duration::from_secs(tv.tv_sec as u64) + Duration::from_micros(tv.tv_usec as u64),
            ));
            Registry::wake_owner(&timer.owner);
        }
    }

    extern "C" fn time_free(e: *mut TimeEventInternal) {
        unsafe {
            (*e.cast::<TimerSource>()).dead.set(true);
        }
    }

    extern "C" fn time_set_destroy(e: *mut TimeEventInternal, cb: Option<TimeEventDestroyCb>) {
        unsafe {
            (*e.cast::<TimerSource>()).destroy.set(cb);
        }
    }

    extern "C" fn defer_new(
        a: *const MainloopApi,
        cb: Option<DeferEventCb>,
        userdata: *mut c_void,
    ) -> *mut DeferEventInternal {
        unsafe {
            let registry = Registry::from_api(a);
            let item = registry.adopt(
                &registry.defers,
                Box::new(DeferSource {
                    owner: Rc::downgrade(&registry),
                    enabled: Cell::new(true),
                    dead: Cell::new(false),
                    cb,
                    userdata,
                    destroy: Cell::new(None),
                }),
            );
            item.cast()
        }
    }

    extern "C" fn defer_enable(e: *mut DeferEventInternal, enable: i32) {
        unsafe {
            let defer = &*e.cast::<DeferSource>();
            defer.enabled.set(enable != 0);
            if enable != 0 {
                Registry::wake_owner(&defer.owner);
            }
        }
    }

    extern "C" fn defer_free(e: *mut DeferEventInternal) {
        unsafe {
            (*e.cast::<DeferSource>()).dead.set(true);
        }
    }

    extern "C" fn defer_set_destroy(e: *mut DeferEventInternal, cb: Option<DeferEventDestroyCb>) {
        unsafe {
            (*e.cast::<DeferSource>()).destroy.set(cb);
        }
    }

    extern "C" fn quit(a: *const MainloopApi, retval: RetvalActual) {
        unsafe {
            let registry = Registry::from_api(a);
            registry.quit.set(Some(retval));
            registry.wake();
        }
    }
}
