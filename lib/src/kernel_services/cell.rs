use spin::Once;

/// Holder for a registered service table.
///
/// Registration happens exactly once; later registrations are ignored (the
/// first writer wins, matching boot ordering where exactly one crate is
/// responsible for wiring each service).
pub struct ServiceCell<T: 'static> {
    name: &'static str,
    inner: Once<&'static T>,
}

impl<T: 'static> ServiceCell<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Once::new(),
        }
    }

    pub fn register(&self, table: &'static T) {
        self.inner.call_once(|| table);
    }

    /// Fetch the registered table.
    ///
    /// # Panics
    ///
    /// Panics if no table has been registered; calling a service before the
    /// boot code wires it is a kernel bug, not a recoverable condition.
    #[inline]
    pub fn get(&self) -> &'static T {
        match self.inner.get() {
            Some(table) => table,
            None => panic!("kernel service '{}' used before registration", self.name),
        }
    }

    #[inline]
    pub fn try_get(&self) -> Option<&'static T> {
        self.inner.get().copied()
    }
}
