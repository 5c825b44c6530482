//! ChatServer Actor implementation
//!
//! The broadcast hub: owns every live connection and every broadcast
//! group. Connection sessions talk to it only through `ServerCommand`s,
//! so group membership needs no locks. The hub never touches the store.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::error::SendError;
use crate::message::ServerMessage;
use crate::types::{ClientId, Group};

/// Commands sent from sessions to the ChatServer actor
#[derive(Debug)]
pub enum ServerCommand {
    /// New connection authenticated
    Connect {
        client_id: ClientId,
        sender: mpsc::Sender<ServerMessage>,
    },
    /// Connection closed; drops it from every group
    Disconnect { client_id: ClientId },
    JoinGroup { client_id: ClientId, group: Group },
    LeaveGroup { client_id: ClientId, group: Group },
    /// Leave every group (re-authentication)
    LeaveAllGroups { client_id: ClientId },
    /// Deliver once to every connection in any of `groups`
    Broadcast {
        groups: Vec<Group>,
        message: ServerMessage,
    },
    /// Deliver to a single connection
    SendTo {
        client_id: ClientId,
        message: ServerMessage,
    },
}

/// The main ChatServer actor
pub struct ChatServer {
    /// All connected clients: ClientId -> Client
    clients: HashMap<ClientId, Client>,
    /// Group -> member connections
    groups: HashMap<Group, HashSet<ClientId>>,
    /// Command receiver channel
    receiver: mpsc::Receiver<ServerCommand>,
}

impl ChatServer {
    /// Create a new ChatServer with the given command receiver
    pub fn new(receiver: mpsc::Receiver<ServerCommand>) -> Self {
        Self {
            clients: HashMap::new(),
            groups: HashMap::new(),
            receiver,
        }
    }

    /// Run the ChatServer event loop
    ///
    /// Continuously receives and processes commands until all senders are dropped.
    pub async fn run(mut self) {
        info!("ChatServer started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("ChatServer shutting down");
    }

    /// Process a single command
    fn handle_command(&mut self, cmd: ServerCommand) {
        match cmd {
            ServerCommand::Connect { client_id, sender } => {
                self.clients.insert(client_id, Client::new(client_id, sender));
                debug!("Client {} registered, total clients: {}", client_id, self.clients.len());
            }
            ServerCommand::Disconnect { client_id } => {
                self.unregister(client_id);
            }
            ServerCommand::JoinGroup { client_id, group } => {
                self.join(client_id, group);
            }
            ServerCommand::LeaveGroup { client_id, group } => {
                self.leave(client_id, group);
            }
            ServerCommand::LeaveAllGroups { client_id } => {
                self.leave_all(client_id);
            }
            ServerCommand::Broadcast { groups, message } => {
                self.broadcast(&groups, message);
            }
            ServerCommand::SendTo { client_id, message } => {
                self.deliver(client_id, message);
            }
        }
    }

    fn unregister(&mut self, client_id: ClientId) {
        self.leave_all(client_id);
        self.clients.remove(&client_id);
        debug!(
            "Client {} unregistered, total clients: {}, groups: {}",
            client_id,
            self.clients.len(),
            self.groups.len()
        );
    }

    fn join(&mut self, client_id: ClientId, group: Group) {
        let Some(client) = self.clients.get_mut(&client_id) else {
            warn!("Join of {} by unknown client {}", group, client_id);
            return;
        };
        client.groups.insert(group);
        self.groups.entry(group).or_default().insert(client_id);
        debug!("Client {} joined {}", client_id, group);
    }

    fn leave(&mut self, client_id: ClientId, group: Group) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.groups.remove(&group);
        }
        if let Some(members) = self.groups.get_mut(&group) {
            members.remove(&client_id);
            if members.is_empty() {
                self.groups.remove(&group);
            }
        }
        debug!("Client {} left {}", client_id, group);
    }

    fn leave_all(&mut self, client_id: ClientId) {
        let joined: Vec<Group> = self
            .clients
            .get(&client_id)
            .map(|c| c.groups.iter().copied().collect())
            .unwrap_or_default();
        for group in joined {
            self.leave(client_id, group);
        }
    }

    fn broadcast(&mut self, groups: &[Group], message: ServerMessage) {
        let recipients: HashSet<ClientId> = groups
            .iter()
            .filter_map(|g| self.groups.get(g))
            .flatten()
            .copied()
            .collect();

        debug!("Broadcast to {:?}: {} recipients", groups, recipients.len());
        for client_id in recipients {
            self.deliver(client_id, message.clone());
        }
    }

    /// Hand a message to one connection without blocking the hub.
    /// A full buffer drops the message; a closed one drops the client.
    fn deliver(&mut self, client_id: ClientId, message: ServerMessage) {
        let Some(client) = self.clients.get(&client_id) else {
            return;
        };
        match client.send(message) {
            Ok(()) => {}
            Err(SendError::ChannelFull) => {
                warn!("Client {} is not keeping up, message dropped", client_id);
            }
            Err(SendError::ChannelClosed) => {
                debug!("Client {} channel closed", client_id);
                self.unregister(client_id);
            }
        }
    }

    #[cfg(test)]
    fn members(&self, group: &Group) -> HashSet<ClientId> {
        self.groups.get(group).cloned().unwrap_or_default()
    }
}
