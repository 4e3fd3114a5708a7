use std::sync::Once;

static SIGNAL_INIT: Once = Once::new();

/// Install the process-wide signal policy for broken-peer writes.
///
/// Writing to a socket whose peer has closed raises SIGPIPE, which would
/// terminate the process; the library ignores it and surfaces the
/// condition as a write error instead. Idempotent; invoked implicitly by
/// every connect and listen entry point.
pub fn initialise() {
    initialise_with(None);
}

/// Like [`initialise`], but install a caller-provided SIGPIPE handler
/// instead of ignoring the signal. Only the first initialisation in the
/// process takes effect.
pub fn initialise_with(handler: Option<extern "C" fn(libc::c_int)>) {
    SIGNAL_INIT.call_once(|| {
        let disposition = match handler {
            Some(h) => h as usize as libc::sighandler_t,
            None => libc::SIG_IGN,
        };
        // SAFETY: setting a signal disposition is process-global and
        // always permitted; the handler is either SIG_IGN or a plain
        // extern "C" function supplied by the caller.
        unsafe {
            libc::signal(libc::SIGPIPE, disposition);
        }
    });
}
