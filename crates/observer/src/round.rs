//! Voting-round state.

use crate::messages::{
    BlockGenMessage, BlockVote, BlockVoteMessage, RoundVoteAck, RoundVoteAckMessage,
    RoundVoteMessage,
};
use fornax_ledger::Context;
use fornax_types::PublicHash;
use std::collections::{HashMap, VecDeque};

/// Where the round currently stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundState {
    Empty,
    RoundVote,
    RoundVoteAck,
    BlockVote,
}

/// One block slot inside a vote round.
///
/// A formulator is scheduled for up to `max_blocks_per_formulator`
/// consecutive blocks; each gets its own `BlockRound` with its own vote map
/// and wait maps for out-of-order messages.
pub struct BlockRound {
    pub target_height: u32,
    /// Observer → accepted block vote.
    pub block_vote_map: HashMap<PublicHash, BlockVote>,
    /// The produced block, once received and validated.
    pub block_gen_message: Option<BlockGenMessage>,
    /// The context evaluated from the produced block.
    pub context: Option<Context>,
    /// Block votes that arrived before the block itself.
    pub block_vote_wait_map: HashMap<PublicHash, BlockVoteMessage>,
    /// A block-gen message that arrived before its slot became current.
    pub block_gen_message_wait: Option<BlockGenMessage>,
}

impl BlockRound {
    pub fn new(target_height: u32) -> Self {
        Self {
            target_height,
            block_vote_map: HashMap::new(),
            block_gen_message: None,
            context: None,
            block_vote_wait_map: HashMap::new(),
            block_gen_message_wait: None,
        }
    }
}

/// All intermediate voting state for one formulator slot.
pub struct VoteRound {
    pub round_state: RoundState,
    pub vote_target_height: u32,
    /// Consecutive failed vote cycles at this height.
    pub vote_fail_count: u32,
    /// Observer → phase-1 vote for this round.
    pub round_vote_message_map: HashMap<PublicHash, RoundVoteMessage>,
    /// Observer → phase-2 ack for this round.
    pub round_vote_ack_message_map: HashMap<PublicHash, RoundVoteAckMessage>,
    /// The deterministically selected minimum ack, once phase 2 settles.
    pub min_round_vote_ack: Option<RoundVoteAck>,
    /// Phase-1 votes parked for a future target height.
    pub round_vote_wait_map: HashMap<PublicHash, RoundVoteMessage>,
    /// Phase-2 acks parked for a future target height.
    pub round_vote_ack_wait_map: HashMap<PublicHash, RoundVoteAckMessage>,
    /// Open block slots, head first.
    pub block_rounds: VecDeque<BlockRound>,
    /// Finalized slots of this round.
    pub closed_block_rounds: Vec<BlockRound>,
}

impl VoteRound {
    pub fn new(target_height: u32, max_blocks_per_formulator: u32) -> Self {
        let mut block_rounds = VecDeque::with_capacity(max_blocks_per_formulator as usize);
        for i in 0..max_blocks_per_formulator {
            block_rounds.push_back(BlockRound::new(target_height + i));
        }
        Self {
            round_state: RoundState::RoundVote,
            vote_target_height: target_height,
            vote_fail_count: 0,
            round_vote_message_map: HashMap::new(),
            round_vote_ack_message_map: HashMap::new(),
            min_round_vote_ack: None,
            round_vote_wait_map: HashMap::new(),
            round_vote_ack_wait_map: HashMap::new(),
            block_rounds,
            closed_block_rounds: Vec::new(),
        }
    }

    /// The slot currently being voted on.
    pub fn current_block_round(&self) -> Option<&BlockRound> {
        self.block_rounds.front()
    }

    pub fn current_block_round_mut(&mut self) -> Option<&mut BlockRound> {
        self.block_rounds.front_mut()
    }

    /// Find the open slot for a target height.
    pub fn block_round_mut(&mut self, target_height: u32) -> Option<&mut BlockRound> {
        self.block_rounds
            .iter_mut()
            .find(|br| br.target_height == target_height)
    }

    /// Close the head slot after its block committed.
    pub fn close_block_round(&mut self) {
        if let Some(br) = self.block_rounds.pop_front() {
            self.closed_block_rounds.push(br);
        }
    }

    pub fn block_round_count(&self) -> usize {
        self.block_rounds.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_ladder_from_target_height() {
        let round = VoteRound::new(5, 3);
        let heights: Vec<u32> = round.block_rounds.iter().map(|br| br.target_height).collect();
        assert_eq!(heights, vec![5, 6, 7]);
        assert_eq!(round.round_state, RoundState::RoundVote);
    }

    #[test]
    fn closing_advances_the_ladder() {
        let mut round = VoteRound::new(5, 2);
        round.close_block_round();
        assert_eq!(round.current_block_round().unwrap().target_height, 6);
        assert_eq!(round.block_round_count(), 1);
        assert_eq!(round.closed_block_rounds.len(), 1);
    }
}
