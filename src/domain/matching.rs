/// Continuous double auction matching
///
/// `match_order` takes an incoming limit order (the taker) and executes it
/// against the opposite side of a book:
///
/// 1. While the taker has quantity left and the best opposite order crosses
///    its limit, trade `min(taker.remaining, maker.remaining)` at the maker's
///    price. Filled makers leave the book.
/// 2. Any remainder rests on the taker's own side.
///
/// Input is assumed pre-validated (positive quantity, tradable price); the
/// function never fails.

use super::entities::{AccountId, Order, OrderId, OrderStatus, Trade, TradeId};
use super::orderbook::OrderBook;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// What happened to one resting order during a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakerFill {
    pub order_id: OrderId,
    pub account_id: AccountId,
    pub quantity: u64,
    pub remaining_before: u64,
    pub remaining_after: u64,
    pub status: OrderStatus,
}

#[derive(Debug, Clone)]
pub struct MatchResult {
    pub trades: SmallVec<[Trade; 8]>,
    pub maker_fills: SmallVec<[MakerFill; 8]>,
    /// The incoming order after matching.
    pub taker: Order,
    /// Whether the taker's remainder was added to the book.
    pub rested: bool,
}

/// Matches `taker` against `book`.
///
/// `next_trade_id` is called once per trade, in execution order.
pub fn match_order<B, F>(book: &mut B, mut taker: Order, executed_at: u64, mut next_trade_id: F) -> MatchResult
where
    B: OrderBook + ?Sized,
    F: FnMut() -> TradeId,
{
    let maker_side = taker.side.opposite();
    let mut trades: SmallVec<[Trade; 8]> = SmallVec::new();
    let mut maker_fills: SmallVec<[MakerFill; 8]> = SmallVec::new();

    while taker.remaining > 0 {
        let Some(maker) = book.peek_best_mut(maker_side) else {
            break;
        };
        if !taker.crosses(maker.price) {
            break;
        }

        let quantity = taker.remaining.min(maker.remaining);
        let remaining_before = maker.remaining;
        maker.fill(quantity);
        taker.fill(quantity);

        let trade = Trade::between(next_trade_id(), &taker, maker, quantity, executed_at);
        maker_fills.push(MakerFill {
            order_id: maker.id,
            account_id: maker.account_id,
            quantity,
            remaining_before,
            remaining_after: maker.remaining,
            status: maker.status,
        });
        let maker_done = maker.remaining == 0;

        if maker_done {
            book.remove_best(maker_side);
        }
        book.record_trade(trade.price, quantity);
        trades.push(trade);
    }

    let rested = taker.remaining > 0;
    if rested {
        book.insert(taker.clone());
    }

    MatchResult {
        trades,
        maker_fills,
        taker,
        rested,
    }
}
