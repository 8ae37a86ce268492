/// Items that carry an identifier assigned by the system of record.
pub trait Identified {
    /// The item's identifier, or `None` if it has not been assigned yet.
    fn id(&self) -> Option<u64>;

    /// Assigns an identifier.
    fn set_id(&mut self, id: u64);
}

/// A collection result wrapped the way list endpoints return it: `{ data: [...] }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing<T> {
    pub data: Vec<T>,
}

impl<T> Default for Listing<T> {
    fn default() -> Self {
        Self { data: Vec::new() }
    }
}

impl<T> From<Vec<T>> for Listing<T> {
    fn from(data: Vec<T>) -> Self {
        Self { data }
    }
}

impl<T: Identified> Listing<T> {
    /// Finds the item with identifier `id`.
    pub fn find(&self, id: u64) -> Option<&T> {
        self.data.iter().find(|item| item.id() == Some(id))
    }

    /// A provisional identifier for a new item: one past the largest known id,
    /// and never less than `len + 1`.
    ///
    /// This is a local guess. Concurrent creations elsewhere can claim the same
    /// id, so it must be replaced by refetching after the mutation settles.
    pub fn next_local_id(&self) -> u64 {
        let max_id = self.data.iter().filter_map(Identified::id).max().unwrap_or(0);
        max_id.max(self.data.len() as u64) + 1
    }
}

/// Optimistic updater for list endpoints.
///
/// Appends `input` to the cached listing, giving it a local id if it has none.
/// An input whose id is already present replaces that item instead.
///
/// ```
/// use optimistic_query::query::{append_optimistic, Identified, Listing};
///
/// #[derive(Clone, Debug, PartialEq)]
/// struct Hero { id: Option<u64>, name: &'static str }
///
/// impl Identified for Hero {
///     fn id(&self) -> Option<u64> { self.id }
///     fn set_id(&mut self, id: u64) { self.id = Some(id); }
/// }
///
/// let old = Listing::from(vec![Hero { id: Some(1), name: "A" }]);
/// let new = append_optimistic(Some(&old), &Hero { id: None, name: "B" });
///
/// assert_eq!(new.data[1], Hero { id: Some(2), name: "B" });
/// ```
pub fn append_optimistic<T>(old: Option<&Listing<T>>, input: &T) -> Listing<T>
where
    T: Identified + Clone,
{
    let mut listing = old.cloned().unwrap_or_default();
    let mut item = input.clone();

    match item.id() {
        Some(id) => {
            if let Some(existing) = listing.data.iter_mut().find(|i| i.id() == Some(id)) {
                *existing = item;
                return listing;
            }
        }
        None => item.set_id(listing.next_local_id()),
    }

    listing.data.push(item);
    listing
}
