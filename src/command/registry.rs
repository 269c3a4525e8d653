use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::{
    AnyCommand, BoxedCommand, Command, CommandDescriptor, CommandMessage, QueueError, QueueResult,
};

/// Type-erased factory pair for one command type
///
/// `from_descriptor` rebuilds a live command from persisted parameters; the
/// reverse direction lives on [`CommandRegistry::message_for`], which derives
/// the submission half of a descriptor from any live command.
pub trait CommandFactory<C>: Send + Sync {
    /// The type tag this factory builds
    fn type_tag(&self) -> &'static str;

    /// The resource class commands of this type run on
    fn queue(&self) -> &'static str;

    /// Rebuild an executable command from a persisted descriptor
    fn from_descriptor(&self, descriptor: &CommandDescriptor) -> QueueResult<BoxedCommand<C>>;
}

/// Concrete factory implementation, one per registered command type
struct TypedFactory<K: Command> {
    _phantom: PhantomData<K>,
}

impl<K: Command> TypedFactory<K> {
    fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<K: Command> CommandFactory<K::Context> for TypedFactory<K> {
    fn type_tag(&self) -> &'static str {
        K::TYPE_TAG
    }

    fn queue(&self) -> &'static str {
        K::QUEUE
    }

    fn from_descriptor(&self, descriptor: &CommandDescriptor) -> QueueResult<BoxedCommand<K::Context>> {
        let command: K = serde_json::from_str(&descriptor.parameters)?;
        Ok(Box::new(command))
    }
}

/// Registry mapping stable type tags to their factories
///
/// Populated once at startup, before the processor group starts; the explicit
/// tag -> factory map is the only dispatch mechanism, so an unknown tag is
/// either a programming error (at enqueue) or an unrecoverable descriptor
/// (on load from the store).
pub struct CommandRegistry<C> {
    factories: HashMap<String, Arc<dyn CommandFactory<C>>>,
}

impl<C: Send + Sync + 'static> CommandRegistry<C> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a command type
    pub fn register<K: Command<Context = C>>(&mut self) -> QueueResult<()> {
        if self.factories.contains_key(K::TYPE_TAG) {
            return Err(QueueError::DuplicateTypeTag(K::TYPE_TAG.to_string()));
        }
        self.factories
            .insert(K::TYPE_TAG.to_string(), Arc::new(TypedFactory::<K>::new()));
        Ok(())
    }

    /// Look up the factory for a type tag
    pub fn resolve(&self, type_tag: &str) -> QueueResult<&Arc<dyn CommandFactory<C>>> {
        self.factories
            .get(type_tag)
            .ok_or_else(|| QueueError::UnknownTypeTag(type_tag.to_string()))
    }

    /// Rebuild an executable command from a persisted descriptor
    pub fn revive(&self, descriptor: &CommandDescriptor) -> QueueResult<BoxedCommand<C>> {
        self.resolve(&descriptor.type_tag)?.from_descriptor(descriptor)
    }

    /// Derive the submission half of a descriptor from a live command
    ///
    /// Fails fast with [`QueueError::UnknownTypeTag`] when the command's type
    /// was never registered, before anything touches the store.
    pub fn message_for(&self, command: &dyn AnyCommand<C>) -> QueueResult<CommandMessage> {
        let type_tag = command.type_tag();
        if !self.factories.contains_key(type_tag) {
            return Err(QueueError::UnknownTypeTag(type_tag.to_string()));
        }
        Ok(CommandMessage {
            queue: command.queue().to_string(),
            type_tag: type_tag.to_string(),
            idempotency_key: command.idempotency_key(),
            priority: command.priority(),
            parameters: command.parameters()?,
        })
    }

    /// Check if a type tag is registered
    pub fn is_registered(&self, type_tag: &str) -> bool {
        self.factories.contains_key(type_tag)
    }

    /// Get all registered type tags
    pub fn registered_tags(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

impl<C: Send + Sync + 'static> Default for CommandRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CommandResult, DescriptorId, Outcome, Priority};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct RefreshArtwork {
        series_id: u32,
        poster_only: bool,
    }

    #[async_trait::async_trait]
    impl Command for RefreshArtwork {
        type Context = ();

        const TYPE_TAG: &'static str = "RefreshArtwork";
        const QUEUE: &'static str = "images";
        const PRIORITY: Priority = Priority::LOW;

        fn idempotency_key(&self) -> String {
            format!("RefreshArtwork:{}", self.series_id)
        }

        fn describe(&self) -> String {
            format!("Refreshing artwork for series {}", self.series_id)
        }

        async fn execute(&self, _ctx: &(), _attempt: u32) -> CommandResult {
            Ok(Outcome::Done)
        }
    }

    fn descriptor_for(command: &RefreshArtwork, registry: &CommandRegistry<()>) -> CommandDescriptor {
        let message = registry.message_for(command).unwrap();
        CommandDescriptor::from_message(message, DescriptorId::new(), 1)
    }

    #[test]
    fn register_and_resolve() {
        let mut registry = CommandRegistry::<()>::new();
        registry.register::<RefreshArtwork>().unwrap();

        assert!(registry.is_registered("RefreshArtwork"));
        assert_eq!(registry.registered_tags(), vec!["RefreshArtwork"]);
        assert_eq!(registry.resolve("RefreshArtwork").unwrap().queue(), "images");
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut registry = CommandRegistry::<()>::new();
        registry.register::<RefreshArtwork>().unwrap();

        match registry.register::<RefreshArtwork>() {
            Err(QueueError::DuplicateTypeTag(tag)) => assert_eq!(tag, "RefreshArtwork"),
            other => panic!("expected DuplicateTypeTag, got {:?}", other.err()),
        }
    }

    #[test]
    fn unknown_tag_fails_fast_at_enqueue_and_on_load() {
        let registry = CommandRegistry::<()>::new();
        let command = RefreshArtwork {
            series_id: 9,
            poster_only: false,
        };

        assert!(matches!(
            registry.message_for(&command),
            Err(QueueError::UnknownTypeTag(_))
        ));

        let mut populated = CommandRegistry::<()>::new();
        populated.register::<RefreshArtwork>().unwrap();
        let mut descriptor = descriptor_for(&command, &populated);
        descriptor.type_tag = "RetiredCommand".to_string();
        assert!(matches!(
            populated.revive(&descriptor),
            Err(QueueError::UnknownTypeTag(_))
        ));
    }

    #[tokio::test]
    async fn revive_round_trips_every_command_owned_field() {
        let mut registry = CommandRegistry::<()>::new();
        registry.register::<RefreshArtwork>().unwrap();

        let command = RefreshArtwork {
            series_id: 42,
            poster_only: true,
        };
        let descriptor = descriptor_for(&command, &registry);

        let revived = registry.revive(&descriptor).unwrap();
        assert_eq!(revived.type_tag(), descriptor.type_tag);
        assert_eq!(revived.idempotency_key(), descriptor.idempotency_key);
        assert_eq!(revived.priority(), descriptor.priority);
        assert_eq!(revived.describe(), "Refreshing artwork for series 42");

        let round_tripped = registry.message_for(revived.as_ref()).unwrap();
        assert_eq!(round_tripped.parameters, descriptor.parameters);
        assert_eq!(round_tripped.queue, descriptor.queue);
        assert_eq!(round_tripped.priority, descriptor.priority);

        assert_eq!(revived.execute(&(), 0).await.unwrap(), Outcome::Done);
    }
}
