//! The observer state machine.

use crate::messages::{
    BlockGenMessage, BlockVote, BlockVoteMessage, Message, RoundVote, RoundVoteAck,
    RoundVoteAckMessage, RoundVoteMessage,
};
use crate::round::{RoundState, VoteRound};
use crate::ObserverError;
use fornax_kernel::{Kernel, TransactionMessage};
use fornax_ledger::{observer_sign_hash, ChainData};
use fornax_types::{
    is_timestamp_acceptable, recover_public_hash, Hash256, KeyPair, PublicHash,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Observer timing parameters.
#[derive(Clone, Debug)]
pub struct ObserverConfig {
    /// How long one vote cycle may run before the round fails over.
    pub round_timeout: Duration,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            round_timeout: Duration::from_secs(10),
        }
    }
}

/// Inputs to the state machine.
#[derive(Debug)]
pub enum ObserverEvent {
    /// The round timer expired without progress.
    RoundTimer,
    /// An authenticated peer delivered a message.
    Received { from: PublicHash, message: Message },
}

/// Outputs of the state machine, executed by the runner.
#[derive(Debug)]
pub enum ObserverAction {
    /// Send to every connected observer.
    Broadcast(Message),
    /// Send to one observer.
    SendTo { target: PublicHash, message: Message },
    /// (Re)arm the round timer.
    ResetRoundTimer { duration: Duration },
}

/// One observer's cooperative voting state machine.
///
/// Single-threaded: the runner serializes events into it. The kernel is a
/// collaborator, not I/O: validation and commits happen inline.
pub struct ObserverState {
    key: KeyPair,
    kernel: Arc<Kernel>,
    config: ObserverConfig,
    round: VoteRound,
    /// Nanoseconds since the Unix epoch; set by the runner before handling.
    now: u64,
}

impl ObserverState {
    pub fn new(key: KeyPair, kernel: Arc<Kernel>, config: ObserverConfig) -> Self {
        let target_height = kernel.store().height() + 1;
        let max_blocks = kernel.config().max_blocks_per_formulator;
        Self {
            key,
            kernel,
            config,
            round: VoteRound::new(target_height, max_blocks),
            now: 0,
        }
    }

    /// Update the wall clock before handling an event.
    pub fn set_time(&mut self, now_nanos: u64) {
        self.now = now_nanos;
    }

    pub fn public_hash(&self) -> PublicHash {
        self.key.public_hash()
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    pub fn round_state(&self) -> RoundState {
        self.round.round_state
    }

    pub fn vote_target_height(&self) -> u32 {
        self.round.vote_target_height
    }

    pub fn vote_fail_count(&self) -> u32 {
        self.round.vote_fail_count
    }

    /// The formulator agreed in phase 2, once the round has settled.
    pub fn agreed_formulator(&self) -> Option<fornax_types::Address> {
        self.round.min_round_vote_ack.as_ref().map(|ack| ack.formulator)
    }

    /// Enter the first round: broadcast our round vote.
    pub fn start(&mut self) -> Vec<ObserverAction> {
        self.begin_round_vote()
    }

    /// Feed one event through the machine.
    ///
    /// Validation failures on inbound messages are logged and dropped; the
    /// peer is not penalized.
    #[instrument(skip(self, event), fields(observer = %self.key.public_hash(), state = ?self.round.round_state))]
    pub fn handle(&mut self, event: ObserverEvent) -> Vec<ObserverAction> {
        match event {
            ObserverEvent::RoundTimer => self.on_round_timer(),
            ObserverEvent::Received { from, message } => {
                let result = match message {
                    Message::RoundVote(m) => self.on_round_vote(m),
                    Message::RoundVoteAck(m) => self.on_round_vote_ack(m),
                    Message::BlockGen(m) => self.on_block_gen(m),
                    Message::BlockVote(m) => self.on_block_vote(m),
                    Message::Transaction(m) => self.on_transaction(m),
                    Message::BlockRequest { height } => self.on_block_request(from, height),
                    Message::ChainData(cd) => self.on_chain_data(cd),
                    Message::StatusPing { height, .. } => self.on_status_ping(from, height),
                };
                match result {
                    Ok(actions) => actions,
                    Err(e) => {
                        debug!(error = %e, "inbound message dropped");
                        vec![]
                    }
                }
            }
        }
    }

    // ───────────────────────────────────────────────────────────────────
    // Quorums
    // ───────────────────────────────────────────────────────────────────

    /// Matching votes needed to advance a phase.
    fn majority(&self) -> usize {
        self.kernel.observer_keys().len() / 2 + 1
    }

    // ───────────────────────────────────────────────────────────────────
    // Phase 1: RoundVote
    // ───────────────────────────────────────────────────────────────────

    fn make_round_vote(&self, is_reply: bool) -> Result<RoundVoteMessage, ObserverError> {
        let timeout_count = self.round.vote_fail_count;
        let top = self.kernel.top_rank(timeout_count)?;
        let vote = RoundVote {
            chain_coord: self.kernel.chain_coord(),
            last_hash: self.kernel.store().last_hash(),
            vote_target_height: self.round.vote_target_height,
            timeout_count,
            formulator: top.address,
            formulator_public_hash: top.public_hash,
            timestamp: self.now,
            is_reply,
        };
        let signature = self.key.sign(&vote.hash())?;
        Ok(RoundVoteMessage {
            round_vote: vote,
            signature,
        })
    }

    fn begin_round_vote(&mut self) -> Vec<ObserverAction> {
        let msg = match self.make_round_vote(false) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "cannot build round vote");
                return vec![ObserverAction::ResetRoundTimer {
                    duration: self.config.round_timeout,
                }];
            }
        };
        debug!(
            target_height = self.round.vote_target_height,
            timeout_count = msg.round_vote.timeout_count,
            formulator = %msg.round_vote.formulator,
            "round vote"
        );
        self.round
            .round_vote_message_map
            .insert(self.key.public_hash(), msg.clone());
        let mut actions = vec![
            ObserverAction::Broadcast(Message::RoundVote(msg)),
            ObserverAction::ResetRoundTimer {
                duration: self.config.round_timeout,
            },
        ];
        actions.extend(self.try_select_round_vote());
        actions
    }

    fn on_round_vote(&mut self, msg: RoundVoteMessage) -> Result<Vec<ObserverAction>, ObserverError> {
        let sender = msg.sender()?;
        if !self.kernel.observer_keys().contains(&sender) {
            return Err(ObserverError::NotAllowedPublicHash);
        }
        if !is_timestamp_acceptable(msg.round_vote.timestamp, self.now) {
            return Err(ObserverError::InvalidTimestamp);
        }
        let vote = &msg.round_vote;
        if vote.chain_coord != self.kernel.chain_coord() {
            return Err(ObserverError::InvalidVote);
        }
        let target = self.round.vote_target_height;
        if vote.vote_target_height > target {
            self.round.round_vote_wait_map.insert(sender, msg);
            return Ok(vec![]);
        }
        if vote.vote_target_height < target {
            // The sender is behind: answer with our current vote so it can
            // catch up, unless this already is a reply.
            if !vote.is_reply {
                if let Ok(reply) = self.make_round_vote(true) {
                    return Ok(vec![ObserverAction::SendTo {
                        target: sender,
                        message: Message::RoundVote(reply),
                    }]);
                }
            }
            return Ok(vec![]);
        }
        if vote.last_hash != self.kernel.store().last_hash() {
            return Err(ObserverError::InvalidVote);
        }
        if !self
            .kernel
            .is_formulator(vote.formulator, vote.formulator_public_hash)
        {
            return Err(ObserverError::InvalidVote);
        }
        self.round.round_vote_message_map.insert(sender, msg);
        Ok(self.try_select_round_vote())
    }

    /// With a majority of votes present, pick the minimum under the total
    /// order and advance to the ack phase.
    fn try_select_round_vote(&mut self) -> Vec<ObserverAction> {
        if self.round.round_state != RoundState::RoundVote {
            return vec![];
        }
        if self.round.round_vote_message_map.len() < self.majority() {
            return vec![];
        }
        let min_vote = self
            .round
            .round_vote_message_map
            .values()
            .map(|m| m.round_vote.clone())
            .min_by(|a, b| a.cmp_consensus(b))
            .expect("majority checked above");

        let ack = RoundVoteAck {
            vote_target_height: min_vote.vote_target_height,
            timeout_count: min_vote.timeout_count,
            formulator: min_vote.formulator,
            formulator_public_hash: min_vote.formulator_public_hash,
            public_hash: self.key.public_hash(),
            timestamp: self.now,
            is_reply: false,
        };
        let msg = match self.key.sign(&ack.hash()) {
            Ok(signature) => RoundVoteAckMessage {
                round_vote_ack: ack,
                signature,
            },
            Err(e) => {
                warn!(error = %e, "cannot sign round vote ack");
                return vec![];
            }
        };
        self.round.round_state = RoundState::RoundVoteAck;
        self.round
            .round_vote_ack_message_map
            .insert(self.key.public_hash(), msg.clone());
        debug!(
            formulator = %msg.round_vote_ack.formulator,
            timeout_count = msg.round_vote_ack.timeout_count,
            "round vote selected"
        );
        let mut actions = vec![ObserverAction::Broadcast(Message::RoundVoteAck(msg))];
        actions.extend(self.try_advance_to_block_vote());
        actions
    }

    // ───────────────────────────────────────────────────────────────────
    // Phase 2: RoundVoteAck
    // ───────────────────────────────────────────────────────────────────

    fn on_round_vote_ack(
        &mut self,
        msg: RoundVoteAckMessage,
    ) -> Result<Vec<ObserverAction>, ObserverError> {
        let sender = msg.sender()?;
        if !self.kernel.observer_keys().contains(&sender) {
            return Err(ObserverError::NotAllowedPublicHash);
        }
        if !is_timestamp_acceptable(msg.round_vote_ack.timestamp, self.now) {
            return Err(ObserverError::InvalidTimestamp);
        }
        if msg.round_vote_ack.public_hash != sender {
            return Err(ObserverError::InvalidVote);
        }
        let target = self.round.vote_target_height;
        if msg.round_vote_ack.vote_target_height > target {
            self.round.round_vote_ack_wait_map.insert(sender, msg);
            return Ok(vec![]);
        }
        if msg.round_vote_ack.vote_target_height < target {
            return Ok(vec![]);
        }
        self.round.round_vote_ack_message_map.insert(sender, msg);
        Ok(self.try_advance_to_block_vote())
    }

    /// Our own ack carries the fields we selected in phase 1.
    fn selected_ack(&self) -> Option<RoundVoteAck> {
        self.round
            .round_vote_ack_message_map
            .get(&self.key.public_hash())
            .map(|m| m.round_vote_ack.clone())
    }

    fn try_advance_to_block_vote(&mut self) -> Vec<ObserverAction> {
        if self.round.round_state != RoundState::RoundVoteAck {
            return vec![];
        }
        let Some(selected) = self.selected_ack() else {
            return vec![];
        };
        let agreeing: Vec<RoundVoteAck> = self
            .round
            .round_vote_ack_message_map
            .values()
            .map(|m| m.round_vote_ack.clone())
            .filter(|ack| {
                ack.vote_target_height == selected.vote_target_height
                    && ack.timeout_count == selected.timeout_count
                    && ack.formulator == selected.formulator
                    && ack.formulator_public_hash == selected.formulator_public_hash
            })
            .collect();
        if agreeing.len() >= self.majority() {
            let min_ack = agreeing
                .into_iter()
                .min_by(|a, b| a.cmp_consensus(b))
                .expect("majority checked above");
            info!(
                target_height = min_ack.vote_target_height,
                formulator = %min_ack.formulator,
                "round agreed, awaiting block"
            );
            self.round.min_round_vote_ack = Some(min_ack);
            self.round.round_state = RoundState::BlockVote;
            let mut actions = Vec::new();
            let waiting = self
                .round
                .current_block_round_mut()
                .and_then(|br| br.block_gen_message_wait.take());
            if let Some(gen) = waiting {
                actions.extend(self.process_block_gen(gen));
            }
            actions
        } else if self.round.round_vote_ack_message_map.len()
            >= self.kernel.observer_keys().len()
        {
            // Every observer answered and no value reached a majority.
            warn!("round vote acks disagree; failing the round");
            self.fail_round()
        } else {
            vec![]
        }
    }

    // ───────────────────────────────────────────────────────────────────
    // Phase 3: BlockVote
    // ───────────────────────────────────────────────────────────────────

    fn on_block_gen(&mut self, msg: BlockGenMessage) -> Result<Vec<ObserverAction>, ObserverError> {
        let height = msg.block.header.height;
        let current = self.round.current_block_round().map(|br| br.target_height);
        if self.round.round_state != RoundState::BlockVote || Some(height) != current {
            // Early for a later slot of this formulator run, or early for a
            // round that has not settled yet: park it.
            if let Some(br) = self.round.block_round_mut(height) {
                br.block_gen_message_wait = Some(msg);
            }
            return Ok(vec![]);
        }
        Ok(self.process_block_gen(msg))
    }

    fn process_block_gen(&mut self, msg: BlockGenMessage) -> Vec<ObserverAction> {
        if self.round.round_state != RoundState::BlockVote {
            if let Some(br) = self.round.block_round_mut(msg.block.header.height) {
                br.block_gen_message_wait = Some(msg);
            }
            return vec![];
        }
        if self
            .round
            .current_block_round()
            .is_some_and(|br| br.block_gen_message.is_some())
        {
            // Already voted on this slot's block.
            return vec![];
        }
        let Some(min_ack) = self.round.min_round_vote_ack.clone() else {
            return vec![];
        };
        let header = msg.block.header.clone();
        if header.timeout_count != min_ack.timeout_count || header.formulator != min_ack.formulator
        {
            debug!("block does not match the agreed round, dropped");
            return vec![];
        }
        let header_hash = header.hash();
        match recover_public_hash(header_hash, &msg.generator_signature) {
            Ok(pubhash) if pubhash == min_ack.formulator_public_hash => {}
            _ => {
                debug!("generator signature does not match the agreed formulator");
                return vec![];
            }
        }
        let ctx = match self.kernel.validate(&msg.block, &msg.generator_signature) {
            Ok(ctx) => ctx,
            Err(e) => {
                debug!(error = %e, "produced block failed validation");
                return vec![];
            }
        };

        let observer_signature = match self
            .key
            .sign(&observer_sign_hash(header_hash, &msg.generator_signature))
        {
            Ok(sig) => sig,
            Err(e) => {
                warn!(error = %e, "cannot sign block vote");
                return vec![];
            }
        };
        let block_vote = BlockVote {
            vote_target_height: header.height,
            header,
            generator_signature: msg.generator_signature,
            observer_signature,
            is_reply: false,
        };
        let vote_msg = match self.key.sign(&block_vote.hash()) {
            Ok(signature) => BlockVoteMessage {
                block_vote,
                signature,
            },
            Err(e) => {
                warn!(error = %e, "cannot sign block vote message");
                return vec![];
            }
        };

        let me = self.key.public_hash();
        let waiting: Vec<BlockVoteMessage> = {
            let br = self
                .round
                .current_block_round_mut()
                .expect("state checked above");
            br.block_gen_message = Some(msg);
            br.context = Some(ctx);
            br.block_vote_map.insert(me, vote_msg.block_vote.clone());
            br.block_vote_wait_map.drain().map(|(_, m)| m).collect()
        };

        let mut actions = vec![ObserverAction::Broadcast(Message::BlockVote(vote_msg))];
        for parked in waiting {
            match self.on_block_vote(parked) {
                Ok(more) => actions.extend(more),
                Err(e) => debug!(error = %e, "parked block vote dropped"),
            }
        }
        actions.extend(self.try_finalize_block());
        actions
    }

    fn on_block_vote(
        &mut self,
        msg: BlockVoteMessage,
    ) -> Result<Vec<ObserverAction>, ObserverError> {
        let sender = msg.sender()?;
        if !self.kernel.observer_keys().contains(&sender) {
            return Err(ObserverError::NotAllowedPublicHash);
        }
        let height = msg.block_vote.vote_target_height;
        let Some(current) = self.round.current_block_round().map(|br| br.target_height) else {
            return Ok(vec![]);
        };
        if height < current {
            return Ok(vec![]);
        }
        if height > current {
            if let Some(br) = self.round.block_round_mut(height) {
                br.block_vote_wait_map.insert(sender, msg);
            }
            return Ok(vec![]);
        }

        let br = self
            .round
            .current_block_round_mut()
            .expect("current checked above");
        let Some(gen) = &br.block_gen_message else {
            // The vote outran the block itself.
            br.block_vote_wait_map.insert(sender, msg);
            return Ok(vec![]);
        };
        if msg.block_vote.header != gen.block.header {
            return Err(ObserverError::InvalidVote);
        }
        let sign_hash = observer_sign_hash(gen.block.header.hash(), &gen.generator_signature);
        let recovered = recover_public_hash(sign_hash, &msg.block_vote.observer_signature)?;
        if recovered != sender {
            return Err(ObserverError::InvalidVote);
        }
        br.block_vote_map.insert(sender, msg.block_vote);
        Ok(self.try_finalize_block())
    }

    /// With a block-vote quorum present, assemble the chain data and commit.
    fn try_finalize_block(&mut self) -> Vec<ObserverAction> {
        if self.round.round_state != RoundState::BlockVote {
            return vec![];
        }
        let quorum = self.kernel.observer_quorum();
        let ready = self
            .round
            .current_block_round()
            .map(|br| br.block_gen_message.is_some() && br.block_vote_map.len() >= quorum)
            .unwrap_or(false);
        if !ready {
            return vec![];
        }

        let mut br = self
            .round
            .block_rounds
            .pop_front()
            .expect("readiness checked above");
        let gen = br.block_gen_message.take().expect("readiness checked above");
        let ctx = br.context.take();

        let mut voters: Vec<(PublicHash, BlockVote)> = br
            .block_vote_map
            .iter()
            .map(|(p, v)| (*p, v.clone()))
            .collect();
        voters.sort_by_key(|(pubhash, _)| *pubhash);
        let mut signatures = Vec::with_capacity(1 + quorum);
        signatures.push(gen.generator_signature);
        signatures.extend(
            voters
                .iter()
                .take(quorum)
                .map(|(_, vote)| vote.observer_signature),
        );
        let cd = ChainData {
            header: gen.block.header.clone(),
            body: gen.block.body.clone(),
            signatures,
        };
        let height = cd.header.height;
        let agreed_public_hash = self
            .round
            .min_round_vote_ack
            .as_ref()
            .map(|ack| ack.formulator_public_hash);

        match self.kernel.process(cd, ctx) {
            Ok(()) => {
                info!(height, "block finalized");
                self.round.closed_block_rounds.push(br);
                // The ladder only continues while the agreed formulator is
                // still the expected producer after the table rotated.
                let still_top = match (agreed_public_hash, self.kernel.top_rank(0)) {
                    (Some(agreed), Ok(top)) => top.public_hash == agreed,
                    _ => false,
                };
                if self.round.block_round_count() == 0 || !still_top {
                    let next = self.kernel.store().height() + 1;
                    return self.start_new_round(next, 0);
                }
                let mut actions = vec![ObserverAction::ResetRoundTimer {
                    duration: self.config.round_timeout,
                }];
                let waiting = self
                    .round
                    .current_block_round_mut()
                    .and_then(|next| next.block_gen_message_wait.take());
                if let Some(gen) = waiting {
                    actions.extend(self.process_block_gen(gen));
                }
                actions
            }
            Err(e) => {
                warn!(error = %e, height, "commit failed; failing the round");
                self.fail_round()
            }
        }
    }

    // ───────────────────────────────────────────────────────────────────
    // Round rotation
    // ───────────────────────────────────────────────────────────────────

    fn start_new_round(&mut self, target_height: u32, fail_count: u32) -> Vec<ObserverAction> {
        let parked_votes: Vec<RoundVoteMessage> = self
            .round
            .round_vote_wait_map
            .drain()
            .map(|(_, m)| m)
            .collect();
        let parked_acks: Vec<RoundVoteAckMessage> = self
            .round
            .round_vote_ack_wait_map
            .drain()
            .map(|(_, m)| m)
            .collect();

        let max_blocks = self.kernel.config().max_blocks_per_formulator;
        self.round = VoteRound::new(target_height, max_blocks);
        self.round.vote_fail_count = fail_count;

        let mut actions = self.begin_round_vote();
        for msg in parked_votes {
            match self.on_round_vote(msg) {
                Ok(more) => actions.extend(more),
                Err(e) => debug!(error = %e, "parked round vote dropped"),
            }
        }
        for msg in parked_acks {
            match self.on_round_vote_ack(msg) {
                Ok(more) => actions.extend(more),
                Err(e) => debug!(error = %e, "parked round vote ack dropped"),
            }
        }
        actions
    }

    fn fail_round(&mut self) -> Vec<ObserverAction> {
        let fail_count = self.round.vote_fail_count + 1;
        debug!(
            fail_count,
            target_height = self.round.vote_target_height,
            "vote round failed, demoting the head formulator"
        );
        self.start_new_round(self.kernel.store().height() + 1, fail_count)
    }

    fn on_round_timer(&mut self) -> Vec<ObserverAction> {
        self.fail_round()
    }

    // ───────────────────────────────────────────────────────────────────
    // Sync & transactions
    // ───────────────────────────────────────────────────────────────────

    fn on_transaction(
        &mut self,
        msg: TransactionMessage,
    ) -> Result<Vec<ObserverAction>, ObserverError> {
        if let Err(e) = self.kernel.add_transaction(msg.transaction, msg.signatures) {
            debug!(error = %e, "transaction rejected");
        }
        Ok(vec![])
    }

    fn on_block_request(
        &mut self,
        from: PublicHash,
        height: u32,
    ) -> Result<Vec<ObserverAction>, ObserverError> {
        match self.kernel.store().data(height) {
            Ok(cd) => Ok(vec![ObserverAction::SendTo {
                target: from,
                message: Message::ChainData(cd),
            }]),
            Err(_) => Ok(vec![]),
        }
    }

    fn on_chain_data(&mut self, cd: ChainData) -> Result<Vec<ObserverAction>, ObserverError> {
        if cd.header.height != self.kernel.store().height() + 1 {
            return Ok(vec![]);
        }
        self.kernel.screening(&cd)?;
        let height = cd.header.height;
        self.kernel.process(cd, None)?;
        info!(height, "caught up from peer chain data");
        // Our round was for a height that just committed; rotate forward.
        if height >= self.round.vote_target_height {
            return Ok(self.start_new_round(self.kernel.store().height() + 1, 0));
        }
        Ok(vec![])
    }

    fn on_status_ping(
        &mut self,
        from: PublicHash,
        height: u32,
    ) -> Result<Vec<ObserverAction>, ObserverError> {
        let ours = self.kernel.store().height();
        if height > ours {
            return Ok(vec![ObserverAction::SendTo {
                target: from,
                message: Message::BlockRequest { height: ours + 1 },
            }]);
        }
        Ok(vec![])
    }

    /// The chain head as advertised in our status pings.
    pub fn status(&self) -> (u32, Hash256) {
        (self.kernel.store().height(), self.kernel.store().last_hash())
    }
}
