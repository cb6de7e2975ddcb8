//! Subcommand implementations.

use std::sync::Arc;

use roomkeeper_common::RoomkeeperError;
use roomkeeper_config::RoomkeeperConfig;
use roomkeeper_core::{
    AudioDevices, ManagerOptions, MessageEvent, Participant, RoomConnectionManager,
    RoomMembershipStore, RoomPersistence, RoomSpec, SessionEvent, WsTransport,
};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::cli::RoomArgs;

fn membership(
    participant: &Participant,
    persistence: Arc<dyn RoomPersistence>,
) -> Arc<RoomMembershipStore> {
    Arc::new(RoomMembershipStore::new(participant.id.clone(), persistence))
}

/// Go live, stay until Ctrl-C, then tear every session down.
pub async fn run(
    config: &RoomkeeperConfig,
    participant: Participant,
    persistence: Arc<dyn RoomPersistence>,
) -> Result<(), RoomkeeperError> {
    let options = ManagerOptions::from(config);
    let idle_interval = options.keepalive_interval;
    let manager = RoomConnectionManager::new(
        participant.clone(),
        membership(&participant, persistence),
        Arc::new(WsTransport::new(&config.transport)),
        AudioDevices::default(),
        options,
    );

    manager.session_events().subscribe(|event| async move {
        match event {
            SessionEvent::Opened { spec, conversation } => {
                info!(room = %spec, "Conversation opened");
                let room = spec.key();
                conversation
                    .local_messages()
                    .subscribe(move |event: MessageEvent| {
                        let room = room.clone();
                        async move {
                            info!(room = %room, "{}", event.message.summary_line());
                            Ok(())
                        }
                    });
            }
            SessionEvent::Closed { spec } => info!(room = %spec, "Conversation closed"),
        }
        Ok(())
    });

    info!(participant = %participant.id, name = %participant.name, "Going live");
    manager.live().await;
    info!(sessions = manager.session_count().await, "Live");

    loop {
        let deadline = manager
            .keepalive_deadline()
            .await
            .unwrap_or_else(|| Instant::now() + idle_interval);
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Interrupted, leaving rooms");
                break;
            }
            _ = tokio::time::sleep_until(deadline) => {
                debug!(rooms = ?manager.session_keys().await, "Keepalive");
            }
        }
    }

    manager.destroy().await;
    info!("Shutdown complete");
    Ok(())
}

pub async fn join(
    participant: &Participant,
    persistence: Arc<dyn RoomPersistence>,
    args: RoomArgs,
) -> Result<RoomSpec, RoomkeeperError> {
    let spec = RoomSpec::new(args.room, args.endpoint);
    membership(participant, persistence)
        .join(spec.clone())
        .await?;
    info!(room = %spec, "Joined");
    Ok(spec)
}

pub async fn leave(
    participant: &Participant,
    persistence: Arc<dyn RoomPersistence>,
    args: RoomArgs,
) -> Result<RoomSpec, RoomkeeperError> {
    let spec = RoomSpec::new(args.room, args.endpoint);
    membership(participant, persistence).leave(&spec).await?;
    info!(room = %spec, "Left");
    Ok(spec)
}

pub async fn leave_all(
    participant: &Participant,
    persistence: Arc<dyn RoomPersistence>,
) -> Result<(), RoomkeeperError> {
    membership(participant, persistence).leave_all().await?;
    info!("Left every room");
    Ok(())
}

pub async fn list(
    participant: &Participant,
    persistence: Arc<dyn RoomPersistence>,
) -> Result<Vec<RoomSpec>, RoomkeeperError> {
    let store = membership(participant, persistence);
    store.load().await;
    Ok(store.rooms().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomkeeper_common::MembershipError;
    use roomkeeper_core::MemoryPersistence;

    fn room(name: &str) -> RoomArgs {
        RoomArgs {
            room: name.into(),
            endpoint: "wss://rooms.example".into(),
        }
    }

    #[tokio::test]
    async fn membership_commands_share_persistence() {
        let me = Participant::generate("Bot");
        let persistence: Arc<dyn RoomPersistence> = Arc::new(MemoryPersistence::new());

        join(&me, Arc::clone(&persistence), room("lobby")).await.unwrap();
        join(&me, Arc::clone(&persistence), room("cellar")).await.unwrap();
        let rooms = list(&me, Arc::clone(&persistence)).await.unwrap();
        assert_eq!(rooms.len(), 2);

        leave(&me, Arc::clone(&persistence), room("lobby")).await.unwrap();
        let rooms = list(&me, Arc::clone(&persistence)).await.unwrap();
        assert_eq!(rooms, vec![RoomSpec::new("cellar", "wss://rooms.example")]);

        leave_all(&me, Arc::clone(&persistence)).await.unwrap();
        assert!(list(&me, persistence).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn leaving_unknown_room_fails() {
        let me = Participant::generate("Bot");
        let persistence: Arc<dyn RoomPersistence> = Arc::new(MemoryPersistence::new());
        let err = leave(&me, persistence, room("lobby")).await.unwrap_err();
        assert!(matches!(
            err,
            RoomkeeperError::Membership(MembershipError::NotJoined(_))
        ));
    }

    #[tokio::test]
    async fn join_rejects_blank_room() {
        let me = Participant::generate("Bot");
        let persistence: Arc<dyn RoomPersistence> = Arc::new(MemoryPersistence::new());
        let err = join(&me, persistence, room("  ")).await.unwrap_err();
        assert!(matches!(
            err,
            RoomkeeperError::Membership(MembershipError::InvalidSpec(_))
        ));
    }
}
