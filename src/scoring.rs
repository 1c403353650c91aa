/// Points for the first correct guess of a round.
pub const BASE_SCORE: u32 = 125;

// 0.8 as a ratio, so the decay stays exact.
const DECAY_NUM: u128 = 4;
const DECAY_DEN: u128 = 5;

// 125 * 0.8^22 < 1, every later guess is worth nothing.
const LAST_SCORING_ORDER: u32 = 21;

/// Points for the `order`-th correct guess of a round (0-indexed):
/// `floor(125 * 0.8^order)`.
pub fn score_delta(order: u32) -> u32 {
    if order > LAST_SCORING_ORDER {
        return 0;
    }
    let num = BASE_SCORE as u128 * DECAY_NUM.pow(order);
    (num / DECAY_DEN.pow(order)) as u32
}
