use crate::error::Result;
use crate::events::{MaximizeState, Rect};

use super::geometry_store::GeometryRecord;
use super::host::WindowManager;

/// Раскладка мониторов на момент попытки восстановления
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorLayout {
    pub primary: usize,
    /// Рабочие области по индексу монитора
    pub work_areas: Vec<Rect>,
}

impl MonitorLayout {
    pub fn from_host<H: WindowManager + ?Sized>(host: &H) -> Result<Self> {
        let work_areas = (0..host.monitor_count())
            .map(|index| host.work_area_for_monitor(index))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            primary: host.primary_monitor_index(),
            work_areas,
        })
    }

    pub fn monitor_count(&self) -> usize {
        self.work_areas.len()
    }
}

/// Что сделать с окном
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    AlreadyCorrect,
    Unmaximize,
    Apply(Rect),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    pub monitor: usize,
    pub target: Rect,
    pub action: ReconcileAction,
}

/// Сохранённый монитор, если он ещё есть, иначе основной
pub fn resolve_monitor(saved: usize, layout: &MonitorLayout) -> usize {
    if saved < layout.monitor_count() {
        saved
    } else {
        layout.primary
    }
}

/// Втиснуть прямоугольник в рабочую область: сначала размер, затем позицию
pub fn clamp_to_work_area(desired: Rect, area: Rect, min_size: i32) -> Rect {
    let width = desired.width.min(area.width).max(min_size.min(area.width));
    let height = desired.height.min(area.height).max(min_size.min(area.height));

    let x = desired.x.clamp(area.x, area.right() - width);
    let y = desired.y.clamp(area.y, area.bottom() - height);

    Rect::new(x, y, width, height)
}

/// Строго меньше допуска: при допуске 0 окно двигается всегда
fn within_tolerance(a: Rect, b: Rect, tolerance: i32) -> bool {
    (a.x - b.x).abs() < tolerance
        && (a.y - b.y).abs() < tolerance
        && (a.width - b.width).abs() < tolerance
        && (a.height - b.height).abs() < tolerance
}

/// Вычислить целевую геометрию и действие.
///
/// Сравнение с текущей рамкой идёт уже с зажатым прямоугольником: иначе
/// окно, сохранённое за краем экрана, двигалось бы при каждой попытке.
pub fn reconcile(
    desired: &GeometryRecord,
    layout: &MonitorLayout,
    maximized: MaximizeState,
    current: Rect,
    tolerance: i32,
    min_size: i32,
) -> Result<Reconciliation> {
    if desired.width < 1 || desired.height < 1 {
        return Err(crate::positioner_error!(
            geometry,
            "сохранённый размер {}x{}",
            desired.width,
            desired.height
        ));
    }

    let monitor = resolve_monitor(desired.monitor, layout);
    let area = layout.work_areas.get(monitor).copied().ok_or_else(|| {
        crate::positioner_error!(geometry, "нет рабочей области для монитора {}", monitor)
    })?;
    if area.is_empty() {
        return Err(crate::positioner_error!(
            geometry,
            "пустая рабочая область монитора {}: {}",
            monitor,
            area
        ));
    }

    let target = clamp_to_work_area(desired.rect(), area, min_size);

    let action = if maximized.is_any() {
        ReconcileAction::Unmaximize
    } else if within_tolerance(target, current, tolerance) {
        ReconcileAction::AlreadyCorrect
    } else {
        ReconcileAction::Apply(target)
    };

    Ok(Reconciliation {
        monitor,
        target,
        action,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> MonitorLayout {
        MonitorLayout {
            primary: 0,
            work_areas: vec![Rect::new(0, 0, 1920, 1080), Rect::new(1920, 0, 2560, 1440)],
        }
    }

    fn saved(x: i32, y: i32, width: i32, height: i32, monitor: usize) -> GeometryRecord {
        GeometryRecord {
            x,
            y,
            width,
            height,
            monitor,
            saved_at: 0,
        }
    }

    #[test]
    fn offscreen_left_edge_is_clamped_then_already_correct() {
        let layout = MonitorLayout {
            primary: 0,
            work_areas: vec![Rect::new(0, 0, 1920, 1080)],
        };
        let desired = saved(-50, 0, 800, 600, 0);

        let result = reconcile(
            &desired,
            &layout,
            MaximizeState::NONE,
            Rect::new(0, 0, 800, 600),
            5,
            100,
        )
        .unwrap();

        assert_eq!(result.target, Rect::new(0, 0, 800, 600));
        assert_eq!(result.action, ReconcileAction::AlreadyCorrect);
    }

    #[test]
    fn missing_monitor_falls_back_to_primary() {
        let layout = layout();
        assert_eq!(resolve_monitor(3, &layout), 0);
        assert_eq!(resolve_monitor(2, &layout), 0);
        assert_eq!(resolve_monitor(1, &layout), 1);

        let secondary_primary = MonitorLayout {
            primary: 1,
            ..layout
        };
        let result = reconcile(
            &saved(100, 100, 800, 600, 3),
            &secondary_primary,
            MaximizeState::NONE,
            Rect::new(0, 0, 10, 10),
            5,
            100,
        )
        .unwrap();
        assert_eq!(result.monitor, 1);
        assert_eq!(result.target, Rect::new(1920, 100, 800, 600));
    }

    #[test]
    fn fully_outside_rect_ends_up_inside() {
        let area = Rect::new(0, 32, 1920, 1048);
        let cases = [
            Rect::new(-5000, -5000, 800, 600),
            Rect::new(5000, 5000, 800, 600),
            Rect::new(1920, 0, 300, 300),
            Rect::new(-3000, 500, 4000, 3000),
        ];

        for desired in cases {
            let clamped = clamp_to_work_area(desired, area, 100);
            assert!(area.contains_rect(&clamped), "{} -> {}", desired, clamped);
        }
    }

    #[test]
    fn size_is_clamped_between_minimum_and_area() {
        let area = Rect::new(0, 0, 1920, 1080);

        assert_eq!(
            clamp_to_work_area(Rect::new(10, 10, 20, 30), area, 100),
            Rect::new(10, 10, 100, 100)
        );
        assert_eq!(
            clamp_to_work_area(Rect::new(10, 10, 4000, 3000), area, 100),
            Rect::new(0, 0, 1920, 1080)
        );
    }

    #[test]
    fn maximized_window_is_unmaximized_first() {
        let result = reconcile(
            &saved(100, 100, 800, 600, 0),
            &layout(),
            MaximizeState {
                horizontal: false,
                vertical: true,
            },
            Rect::new(100, 100, 800, 600),
            5,
            100,
        )
        .unwrap();

        assert_eq!(result.action, ReconcileAction::Unmaximize);
    }

    #[test]
    fn tolerance_boundary_is_exclusive() {
        let desired = saved(100, 100, 800, 600, 0);
        let inside = reconcile(
            &desired,
            &layout(),
            MaximizeState::NONE,
            Rect::new(104, 96, 804, 596),
            5,
            100,
        )
        .unwrap();
        assert_eq!(inside.action, ReconcileAction::AlreadyCorrect);

        let at_edge = reconcile(
            &desired,
            &layout(),
            MaximizeState::NONE,
            Rect::new(105, 100, 800, 600),
            5,
            100,
        )
        .unwrap();
        assert_eq!(
            at_edge.action,
            ReconcileAction::Apply(Rect::new(100, 100, 800, 600))
        );
    }

    #[test]
    fn zero_tolerance_always_applies() {
        let result = reconcile(
            &saved(100, 100, 800, 600, 0),
            &layout(),
            MaximizeState::NONE,
            Rect::new(100, 100, 800, 600),
            0,
            100,
        )
        .unwrap();

        assert_eq!(
            result.action,
            ReconcileAction::Apply(Rect::new(100, 100, 800, 600))
        );
    }

    #[test]
    fn applying_target_makes_next_run_idempotent() {
        let desired = saved(3000, -20, 900, 700, 1);
        let first = reconcile(
            &desired,
            &layout(),
            MaximizeState::NONE,
            Rect::new(0, 0, 640, 480),
            0,
            100,
        )
        .unwrap();
        let ReconcileAction::Apply(rect) = first.action else {
            panic!("ожидалось Apply, получено {:?}", first.action);
        };

        let second =
            reconcile(&desired, &layout(), MaximizeState::NONE, rect, 1, 100).unwrap();
        assert_eq!(second.action, ReconcileAction::AlreadyCorrect);
        assert_eq!(second.target, rect);
    }

    #[test]
    fn invalid_geometry_is_reported() {
        assert!(reconcile(
            &saved(0, 0, 0, 600, 0),
            &layout(),
            MaximizeState::NONE,
            Rect::default(),
            5,
            100
        )
        .is_err());

        let broken = MonitorLayout {
            primary: 0,
            work_areas: vec![Rect::new(0, 0, 0, 0)],
        };
        assert!(reconcile(
            &saved(0, 0, 800, 600, 0),
            &broken,
            MaximizeState::NONE,
            Rect::default(),
            5,
            100
        )
        .is_err());
    }
}
