use futures::{
    FutureExt, Stream, StreamExt,
    stream::{self, BoxStream, select_all},
};

/// A lazily executed side effect that produces messages.
///
/// Nothing happens until the command is driven: either by handing its stream
/// to the caller's event loop with [`Command::into_stream`], or by awaiting
/// [`Command::collect`]. Cache operations that must be observable right away
/// (such as an optimistic write) happen before a command is returned; only the
/// asynchronous part lives inside it.
///
/// # Examples
///
/// ```
/// use optimistic_query::command::Command;
///
/// enum Message {
///     GotResult(i32),
/// }
///
/// let cmd = Command::perform(async { 42 }, Message::GotResult);
/// ```
#[must_use = "commands do nothing unless driven"]
pub struct Command<Msg: Send + 'static> {
    pub(crate) stream: Option<BoxStream<'static, Msg>>,
}

impl<Msg: Send + 'static> Command<Msg> {
    /// Create a command that does nothing.
    ///
    /// ```
    /// use optimistic_query::command::Command;
    ///
    /// let cmd: Command<i32> = Command::none();
    /// assert!(cmd.is_none());
    /// ```
    pub fn none() -> Self {
        Self { stream: None }
    }

    /// Perform an asynchronous operation and convert its result to a message.
    ///
    /// # Arguments
    ///
    /// * `future` - The async operation to perform
    /// * `f` - Function to convert the result into a message
    ///
    /// # Examples
    ///
    /// ```
    /// use optimistic_query::command::Command;
    ///
    /// async fn load_count() -> usize {
    ///     3
    /// }
    ///
    /// enum Message {
    ///     Loaded(usize),
    /// }
    ///
    /// let cmd = Command::perform(load_count(), Message::Loaded);
    /// ```
    pub fn perform<A>(
        future: impl Future<Output = A> + Send + 'static,
        f: impl FnOnce(A) -> Msg + Send + 'static,
    ) -> Self {
        Self::future(future.map(f))
    }

    /// Create a command from a future that produces a message.
    ///
    /// # Examples
    ///
    /// ```
    /// use optimistic_query::command::Command;
    ///
    /// let cmd = Command::future(async { 42 });
    /// assert_eq!(futures::executor::block_on(cmd.collect()), vec![42]);
    /// ```
    pub fn future(future: impl Future<Output = Msg> + Send + 'static) -> Self {
        Self {
            stream: Some(future.into_stream().boxed()),
        }
    }

    /// Create a command from a future that performs a side effect and
    /// produces no message.
    ///
    /// # Examples
    ///
    /// ```
    /// use optimistic_query::command::Command;
    ///
    /// let cmd: Command<String> = Command::effect(async { println!("saved") });
    /// assert!(futures::executor::block_on(cmd.collect()).is_empty());
    /// ```
    pub fn effect(future: impl Future<Output = ()> + Send + 'static) -> Self {
        Self {
            stream: Some(
                future
                    .into_stream()
                    .filter_map(|()| async { None })
                    .boxed(),
            ),
        }
    }

    /// Batch multiple commands into a single command.
    ///
    /// All commands run concurrently and message order is not guaranteed.
    /// `Command::none()` entries are filtered out.
    ///
    /// # Examples
    ///
    /// ```
    /// use optimistic_query::command::Command;
    ///
    /// enum Message {
    ///     Saved(u64),
    ///     Refreshed(String),
    /// }
    ///
    /// let cmd = Command::batch(vec![
    ///     Command::perform(async { 7 }, Message::Saved),
    ///     Command::perform(async { "heroes".to_string() }, Message::Refreshed),
    ///     Command::none(),
    /// ]);
    /// ```
    pub fn batch(commands: impl IntoIterator<Item = Command<Msg>>) -> Self {
        let streams: Vec<_> = commands.into_iter().filter_map(|cmd| cmd.stream).collect();

        if streams.is_empty() {
            Self::none()
        } else {
            Self {
                stream: Some(select_all(streams).boxed()),
            }
        }
    }

    /// Create a command from a stream of messages.
    ///
    /// # Examples
    ///
    /// ```
    /// use optimistic_query::command::Command;
    /// use futures::stream;
    ///
    /// let cmd = Command::stream(stream::iter(vec![1, 2, 3]));
    /// ```
    pub fn stream(stream: impl Stream<Item = Msg> + Send + 'static) -> Self {
        Self {
            stream: Some(stream.boxed()),
        }
    }

    /// Convert every message this command produces.
    ///
    /// # Examples
    ///
    /// ```
    /// use optimistic_query::command::Command;
    ///
    /// let cmd = Command::future(async { 2 }).map(|n| n * 10);
    /// assert_eq!(futures::executor::block_on(cmd.collect()), vec![20]);
    /// ```
    pub fn map<B: Send + 'static>(self, f: impl Fn(Msg) -> B + Send + 'static) -> Command<B> {
        Command {
            stream: self.stream.map(|s| s.map(f).boxed()),
        }
    }

    /// Returns `true` if this command has no side effects.
    pub const fn is_none(&self) -> bool {
        self.stream.is_none()
    }

    /// Hand the command over to an external event loop.
    pub fn into_stream(self) -> BoxStream<'static, Msg> {
        self.stream.unwrap_or_else(|| stream::empty().boxed())
    }

    /// Drive the command to completion and return every message it produced.
    ///
    /// # Examples
    ///
    /// ```
    /// use optimistic_query::command::Command;
    ///
    /// let cmd = Command::batch([Command::future(async { 1 }), Command::none()]);
    /// assert_eq!(futures::executor::block_on(cmd.collect()), vec![1]);
    /// ```
    pub async fn collect(self) -> Vec<Msg> {
        match self.stream {
            Some(stream) => stream.collect().await,
            None => Vec::new(),
        }
    }
}

impl<Msg: Send + 'static> std::fmt::Debug for Command<Msg> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("is_none", &self.is_none())
            .finish()
    }
}
