//! Steady-state ring routing
//!
//! A packet travels one leg at a time: the sender hands it to the first hop of its own
//! route in the chosen direction, and every transit hop pops the next id off the
//! packet. When the route runs out the packet is at a waypoint, which either keeps it
//! or starts the next leg from its own routing table.

use log::{debug, warn};

use crate::yy_broadcast::RoutingTable;
use crate::yy_error::{Error, Result};
use crate::yy_interface::{
    Delivery, Event, EventSink, FileStore, Message, MessageEnvelope, NodeId,
    PacketKind, RingPacket, NO_SUCH_FILE,
};

const ROUTING: &str = "routing";

pub struct RingRouter {
    my_id: NodeId,
    table: RoutingTable,
    files: Box<dyn FileStore>,
    delivery: Box<dyn Delivery>,
}

impl RingRouter {
    pub fn new(
        my_id: NodeId,
        table: RoutingTable,
        files: Box<dyn FileStore>,
        delivery: Box<dyn Delivery>,
    ) -> Self {
        Self {
            my_id,
            table,
            files,
            delivery,
        }
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    /// Every ring member, starting with this node
    pub fn known_nodes(&self) -> &[NodeId] {
        &self.table.all_nodes
    }

    /// Send text to `target`
    pub fn submit(
        &mut self,
        target: NodeId,
        body: &str,
        responses: &mut Vec<MessageEnvelope>,
        sink: &mut dyn EventSink,
    ) -> Result<()> {
        self.originate(target, PacketKind::Message, body.to_string(), None, responses, sink)
    }

    /// Ask `target` for `filename`. The answer comes back through `Delivery::on_file`.
    pub fn request_file(
        &mut self,
        target: NodeId,
        filename: &str,
        responses: &mut Vec<MessageEnvelope>,
        sink: &mut dyn EventSink,
    ) -> Result<()> {
        self.originate(
            target,
            PacketKind::AskFile,
            String::new(),
            Some(filename.to_string()),
            responses,
            sink,
        )
    }

    /// Packet received from neighbor `from`
    pub fn handle_packet(
        &mut self,
        from: NodeId,
        mut packet: RingPacket,
        responses: &mut Vec<MessageEnvelope>,
        sink: &mut dyn EventSink,
    ) -> Result<()> {
        if !packet.route.is_empty() {
            let next = packet.route.remove(0);
            self.forward(next, packet, responses, sink);
            return Ok(());
        }

        if packet.receiver == self.my_id {
            sink.log(
                self.my_id,
                Event::PacketDelivered {
                    from,
                    kind: packet.kind,
                },
            );
            return self.deliver(packet, responses, sink);
        }

        // end of a leg but not the destination: next leg, same way round
        if !self.table.all_nodes.contains(&packet.receiver) {
            return Err(Error::violation(
                self.my_id,
                ROUTING,
                format!("packet from {} for {} which is not on the ring", from, packet.receiver),
            ));
        }
        self.start_leg(packet, responses, sink)
    }

    fn originate(
        &mut self,
        target: NodeId,
        kind: PacketKind,
        body: String,
        filename: Option<String>,
        responses: &mut Vec<MessageEnvelope>,
        sink: &mut dyn EventSink,
    ) -> Result<()> {
        let Some(direction) = self.table.direction_to(&target) else {
            warn!("[{}] {} is not on the ring", self.my_id, target);
            sink.log(self.my_id, Event::RoutingFailed { target });
            return Err(Error::Routing {
                node: self.my_id,
                target,
            });
        };

        let packet = RingPacket {
            kind,
            body,
            receiver: target,
            direction,
            route: Vec::new(),
            sender: self.my_id,
            filename,
        };

        if target == self.my_id {
            sink.log(
                self.my_id,
                Event::PacketDelivered {
                    from: self.my_id,
                    kind,
                },
            );
            return self.deliver(packet, responses, sink);
        }
        self.start_leg(packet, responses, sink)
    }

    /// Hand the packet to the first hop of this node's own route in its direction
    fn start_leg(
        &mut self,
        mut packet: RingPacket,
        responses: &mut Vec<MessageEnvelope>,
        sink: &mut dyn EventSink,
    ) -> Result<()> {
        let route = self.table.route(packet.direction);
        let Some((&next, rest)) = route.split_first() else {
            return Err(Error::violation(
                self.my_id,
                ROUTING,
                format!("no {:?} route towards {}", packet.direction, packet.receiver),
            ));
        };

        packet.route = rest.to_vec();
        self.forward(next, packet, responses, sink);
        Ok(())
    }

    fn forward(
        &self,
        next: NodeId,
        packet: RingPacket,
        responses: &mut Vec<MessageEnvelope>,
        sink: &mut dyn EventSink,
    ) {
        sink.log(
            self.my_id,
            Event::PacketForwarded {
                to: next,
                receiver: packet.receiver,
                kind: packet.kind,
            },
        );
        responses.push(MessageEnvelope {
            sender: self.my_id,
            receiver: next,
            message: Message::RingPacket(packet),
        });
    }

    fn deliver(
        &mut self,
        packet: RingPacket,
        responses: &mut Vec<MessageEnvelope>,
        sink: &mut dyn EventSink,
    ) -> Result<()> {
        match packet.kind {
            PacketKind::Message => {
                self.delivery.on_deliver(packet.sender, &packet.body);
                Ok(())
            }
            PacketKind::AskFile => {
                let filename = packet.filename.unwrap_or_default();
                let contents = self.files.read(&filename);
                debug!(
                    "[{}] {} asked for {:?}, found: {}",
                    self.my_id,
                    packet.sender,
                    filename,
                    contents.is_some()
                );
                let body = contents.unwrap_or_else(|| NO_SUCH_FILE.to_string());
                self.originate(
                    packet.sender,
                    PacketKind::File,
                    body,
                    Some(filename),
                    responses,
                    sink,
                )
            }
            PacketKind::File => {
                let filename = packet.filename.as_deref().unwrap_or_default();
                let contents = (packet.body != NO_SUCH_FILE).then_some(packet.body.as_str());
                self.delivery.on_file(packet.sender, filename, contents);
                Ok(())
            }
        }
    }
}
