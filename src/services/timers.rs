use crate::events::WindowId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

/// Ручка отложенного таймера. Идентификаторы не переиспользуются,
/// поэтому устаревшую ручку нельзя спутать с новой.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

/// Для чего взведён таймер
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerPurpose {
    Restore(WindowId),
    Save(WindowId),
}

/// Сработавший таймер, доставленный в цикл событий
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiredTimer {
    pub handle: TimerHandle,
    pub purpose: TimerPurpose,
}

/// Источник отложенных вызовов для однопоточного цикла событий.
///
/// Каждая ручка принадлежит ровно одному компоненту. Отмена и поглощение
/// идемпотентны: повторный вызов для уже израсходованной ручки ничего не делает.
pub trait TimerHost {
    fn arm(&mut self, delay: Duration, purpose: TimerPurpose) -> TimerHandle;

    /// Отменить таймер. `false`, если ручка уже сработала или отменена.
    fn cancel(&mut self, handle: TimerHandle) -> bool;

    /// Пометить сработавшую ручку израсходованной. `false` означает, что
    /// таймер успели отменить, и срабатывание нужно проигнорировать.
    fn consume(&mut self, handle: TimerHandle) -> bool;

    fn outstanding(&self) -> usize;
}

/// Таймеры на tokio: каждой ручке соответствует задача со `sleep`, отправляющая
/// `FiredTimer` в канал цикла событий.
pub struct TokioTimers {
    next_id: u64,
    tx: UnboundedSender<FiredTimer>,
    armed: HashMap<TimerHandle, JoinHandle<()>>,
}

impl TokioTimers {
    pub fn new() -> (Self, UnboundedReceiver<FiredTimer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                next_id: 0,
                tx,
                armed: HashMap::new(),
            },
            rx,
        )
    }
}

impl TimerHost for TokioTimers {
    fn arm(&mut self, delay: Duration, purpose: TimerPurpose) -> TimerHandle {
        self.next_id += 1;
        let handle = TimerHandle(self.next_id);
        let tx = self.tx.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Получатель мог уже завершиться при остановке
            let _ = tx.send(FiredTimer { handle, purpose });
        });

        self.armed.insert(handle, task);
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) -> bool {
        match self.armed.remove(&handle) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    fn consume(&mut self, handle: TimerHandle) -> bool {
        self.armed.remove(&handle).is_some()
    }

    fn outstanding(&self) -> usize {
        self.armed.len()
    }
}

/// Детерминированные таймеры для тестов: ничего не срабатывает само,
/// тест решает, какую ручку «выстрелить».
#[cfg(test)]
#[derive(Debug, Default)]
pub struct ManualTimers {
    next_id: u64,
    armed: std::collections::BTreeMap<TimerHandle, (Duration, TimerPurpose)>,
}

#[cfg(test)]
impl ManualTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Последний взведённый таймер с данной целью
    pub fn armed_for(&self, purpose: TimerPurpose) -> Option<(TimerHandle, Duration)> {
        self.armed
            .iter()
            .rev()
            .find(|(_, (_, p))| *p == purpose)
            .map(|(handle, (delay, _))| (*handle, *delay))
    }

    /// Сформировать срабатывание для таймера с данной целью (ручку не поглощает)
    pub fn fire(&self, purpose: TimerPurpose) -> Option<FiredTimer> {
        self.armed_for(purpose)
            .map(|(handle, _)| FiredTimer { handle, purpose })
    }
}

#[cfg(test)]
impl TimerHost for ManualTimers {
    fn arm(&mut self, delay: Duration, purpose: TimerPurpose) -> TimerHandle {
        self.next_id += 1;
        let handle = TimerHandle(self.next_id);
        self.armed.insert(handle, (delay, purpose));
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.armed.remove(&handle).is_some()
    }

    fn consume(&mut self, handle: TimerHandle) -> bool {
        self.armed.remove(&handle).is_some()
    }

    fn outstanding(&self) -> usize {
        self.armed.len()
    }
}
