use crate::types::CellIndex;

/// How a handler wants to be scheduled by the worklist.
pub enum Registration {
    /// Re-run whenever one of its cells' domains shrinks.
    Ordinary,
    /// Re-run only when one of its cells becomes fixed.
    Aux,
    /// The unique-value-exclusion handler for a single cell; promoted to the
    /// front of the queue when that cell becomes fixed.
    Exclusion(CellIndex),
}

pub trait WorklistSource {
    fn cells(&self) -> &[CellIndex];
    fn registration(&self) -> Registration;
    fn essential(&self) -> bool;
}

type HandlerIndex = usize;

const NOT_IN_QUEUE: i16 = -2;
const QUEUE_TAIL: i16 = -1;
const NO_HANDLER: i16 = -3;

/// FIFO worklist of handlers awaiting re-execution.
///
/// The queue is a single-linked list threaded through a fixed `i16` array
/// indexed by handler: `-2` means not queued, `-1` marks the tail, anything
/// else is the next queued handler. Stamping entries back to `-2` on pop
/// keeps membership checks O(1) with no clearing pass.
pub struct HandlerAccumulator {
    queue: Vec<i16>,
    head: i16,
    tail: i16,
    active_handler: i16,
    skip_non_essential: bool,
    ordinary_handlers: Vec<Vec<HandlerIndex>>,
    essential_ordinary_handlers: Vec<Vec<HandlerIndex>>,
    aux_handlers: Vec<Vec<HandlerIndex>>,
    exclusion_handlers: Vec<HandlerIndex>,
}

impl HandlerAccumulator {
    pub fn new<H: WorklistSource>(num_cells: usize, handlers: &[H]) -> HandlerAccumulator {
        assert!(handlers.len() < i16::MAX as usize);

        let mut ordinary_handlers = vec![Vec::new(); num_cells];
        let mut essential_ordinary_handlers = vec![Vec::new(); num_cells];
        let mut aux_handlers = vec![Vec::new(); num_cells];
        let mut exclusion_handlers = vec![usize::MAX; num_cells];

        for (index, handler) in handlers.iter().enumerate() {
            match handler.registration() {
                Registration::Exclusion(cell) => {
                    exclusion_handlers[cell] = index;
                }
                Registration::Aux => {
                    for &cell in handler.cells() {
                        aux_handlers[cell].push(index);
                    }
                }
                Registration::Ordinary => {
                    for &cell in handler.cells() {
                        ordinary_handlers[cell].push(index);
                        if handler.essential() {
                            essential_ordinary_handlers[cell].push(index);
                        }
                    }
                }
            }
        }

        HandlerAccumulator {
            queue: vec![NOT_IN_QUEUE; handlers.len()],
            head: QUEUE_TAIL,
            tail: QUEUE_TAIL,
            active_handler: NO_HANDLER,
            skip_non_essential: false,
            ordinary_handlers,
            essential_ordinary_handlers,
            aux_handlers,
            exclusion_handlers,
        }
    }

    /// Clears the queue and selects the ordinary-handler lookup for this
    /// round. Skip mode is used when every cell is about to be fixed, where
    /// only essential handlers still need a final say.
    pub fn reset(&mut self, skip_non_essential: bool) {
        let mut index = self.head;
        while index >= 0 {
            let next = self.queue[index as usize];
            self.queue[index as usize] = NOT_IN_QUEUE;
            index = next;
        }
        self.head = QUEUE_TAIL;
        self.tail = QUEUE_TAIL;
        self.active_handler = NO_HANDLER;
        self.skip_non_essential = skip_non_essential;
    }

    /// Schedules everything interested in `cell` becoming fixed. The
    /// exclusion handler jumps the queue so conflicting neighbours are
    /// cleared before anything heavier runs.
    pub fn add_for_fixed_cell(&mut self, cell: CellIndex) {
        let exclusion = self.exclusion_handlers[cell];
        if exclusion != usize::MAX {
            self.push_front(exclusion);
        }
        if !self.skip_non_essential {
            for i in 0..self.aux_handlers[cell].len() {
                self.push_back(self.aux_handlers[cell][i]);
            }
        }
        self.add_for_cell(cell);
    }

    /// Schedules the ordinary handlers watching `cell`, except the one
    /// currently being run (it already saw the change it made).
    pub fn add_for_cell(&mut self, cell: CellIndex) {
        let lookup = if self.skip_non_essential {
            &self.essential_ordinary_handlers
        } else {
            &self.ordinary_handlers
        };
        for i in 0..lookup[cell].len() {
            let handler_index = lookup[cell][i];
            if handler_index as i16 != self.active_handler {
                // Inlined push_back: the lookup borrow blocks a method call.
                if self.queue[handler_index] != NOT_IN_QUEUE {
                    continue;
                }
                self.queue[handler_index] = QUEUE_TAIL;
                if self.tail >= 0 {
                    self.queue[self.tail as usize] = handler_index as i16;
                } else {
                    self.head = handler_index as i16;
                }
                self.tail = handler_index as i16;
            }
        }
    }

    pub fn take_next(&mut self) -> Option<HandlerIndex> {
        if self.head < 0 {
            self.active_handler = NO_HANDLER;
            return None;
        }
        let index = self.head as usize;
        let next = self.queue[index];
        self.queue[index] = NOT_IN_QUEUE;
        if next == QUEUE_TAIL {
            self.head = QUEUE_TAIL;
            self.tail = QUEUE_TAIL;
        } else {
            self.head = next;
        }
        self.active_handler = index as i16;
        Some(index)
    }

    pub fn is_empty(&self) -> bool {
        self.head < 0
    }

    fn push_back(&mut self, index: HandlerIndex) {
        if self.queue[index] != NOT_IN_QUEUE {
            return;
        }
        self.queue[index] = QUEUE_TAIL;
        if self.tail >= 0 {
            self.queue[self.tail as usize] = index as i16;
        } else {
            self.head = index as i16;
        }
        self.tail = index as i16;
    }

    fn push_front(&mut self, index: HandlerIndex) {
        if self.queue[index] != NOT_IN_QUEUE {
            return;
        }
        if self.head >= 0 {
            self.queue[index] = self.head;
        } else {
            self.queue[index] = QUEUE_TAIL;
            self.tail = index as i16;
        }
        self.head = index as i16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeHandler {
        cells: Vec<CellIndex>,
        registration: fn() -> Registration,
        essential: bool,
    }

    impl WorklistSource for FakeHandler {
        fn cells(&self) -> &[CellIndex] {
            &self.cells
        }
        fn registration(&self) -> Registration {
            (self.registration)()
        }
        fn essential(&self) -> bool {
            self.essential
        }
    }

    fn ordinary(cells: Vec<CellIndex>, essential: bool) -> FakeHandler {
        FakeHandler {
            cells,
            registration: || Registration::Ordinary,
            essential,
        }
    }

    #[test]
    fn fifo_order_with_dedup() {
        let handlers = vec![
            ordinary(vec![0], true),
            ordinary(vec![0, 1], true),
            ordinary(vec![1], true),
        ];
        let mut acc = HandlerAccumulator::new(2, &handlers);
        acc.reset(false);
        acc.add_for_cell(0); // queues 0, 1
        acc.add_for_cell(1); // queues 2; 1 already present
        assert_eq!(acc.take_next(), Some(0));
        assert_eq!(acc.take_next(), Some(1));
        assert_eq!(acc.take_next(), Some(2));
        assert_eq!(acc.take_next(), None);
        assert!(acc.is_empty());
    }

    #[test]
    fn exclusion_handler_jumps_the_queue() {
        let handlers = vec![
            ordinary(vec![0], true),
            FakeHandler {
                cells: vec![0],
                registration: || Registration::Exclusion(0),
                essential: true,
            },
        ];
        let mut acc = HandlerAccumulator::new(1, &handlers);
        acc.reset(false);
        acc.add_for_fixed_cell(0);
        assert_eq!(acc.take_next(), Some(1));
        assert_eq!(acc.take_next(), Some(0));
        assert_eq!(acc.take_next(), None);
    }

    #[test]
    fn active_handler_not_rescheduled() {
        let handlers = vec![ordinary(vec![0], true), ordinary(vec![0], true)];
        let mut acc = HandlerAccumulator::new(1, &handlers);
        acc.reset(false);
        acc.add_for_cell(0);
        assert_eq!(acc.take_next(), Some(0));
        // Handler 0 is active; re-adding its cell only requeues handler 1.
        acc.add_for_cell(0);
        assert_eq!(acc.take_next(), Some(1));
        acc.add_for_cell(0); // handler 1 active now; handler 0 requeues
        assert_eq!(acc.take_next(), Some(0));
        assert_eq!(acc.take_next(), None);
    }

    #[test]
    fn skip_mode_drops_non_essential_and_aux() {
        let handlers = vec![
            ordinary(vec![0], false),
            ordinary(vec![0], true),
            FakeHandler {
                cells: vec![0],
                registration: || Registration::Aux,
                essential: true,
            },
        ];
        let mut acc = HandlerAccumulator::new(1, &handlers);
        acc.reset(true);
        acc.add_for_fixed_cell(0);
        assert_eq!(acc.take_next(), Some(1));
        assert_eq!(acc.take_next(), None);

        acc.reset(false);
        acc.add_for_fixed_cell(0);
        assert_eq!(acc.take_next(), Some(2)); // aux queued before ordinary
        assert_eq!(acc.take_next(), Some(0));
        assert_eq!(acc.take_next(), Some(1));
    }
}
