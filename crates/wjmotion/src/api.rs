//! Vendor-compatible flat API.
//!
//! [`WjApi`] mirrors the `WJ_*` export table of the vendor DLL one entry
//! point at a time: integer axis and line numbers, integer status codes
//! (see [`wjmotion_core::status`]), and query results written through
//! `&mut i32` outputs. It holds at most one open [`Board`], the same way
//! the DLL keeps one global connection.
//!
//! Outputs are written only when the call succeeds; on failure they keep
//! whatever the caller put there.
//!
//! ```no_run
//! use wjmotion::api::WjApi;
//! use wjmotion::status;
//!
//! # async fn example() {
//! let mut api = WjApi::new();
//! assert_eq!(api.wj_open(0).await, status::OK);
//! let mut acc = 0;
//! if api.wj_get_axis_acc(1, &mut acc).await == status::OK {
//!     println!("axis 1 acceleration {acc}");
//! }
//! api.wj_close().await;
//! # }
//! ```

use wjmotion_board::{Board, BoardBuilder};
use wjmotion_core::{AxisField, Connector, Error, PortId, Result, status};
use wjmotion_transport::{SerialConfig, SerialConnector};

/// The flat `WJ_*` entry points over one board connection.
pub struct WjApi {
    connector: Box<dyn Connector>,
    builder: BoardBuilder,
    board: Option<Board>,
}

impl Default for WjApi {
    fn default() -> Self {
        Self::new()
    }
}

impl WjApi {
    /// Serial ports with default settings.
    pub fn new() -> Self {
        Self::with_connector(
            SerialConnector::with_config(SerialConfig::default()),
            BoardBuilder::new(),
        )
    }

    /// Open ports through `connector`, configured by `builder`. The
    /// builder's port is replaced by the argument of each
    /// [`wj_open`](Self::wj_open).
    pub fn with_connector(connector: impl Connector + 'static, builder: BoardBuilder) -> Self {
        WjApi {
            connector: Box::new(connector),
            builder,
            board: None,
        }
    }

    /// The open board, if any.
    pub fn board(&self) -> Option<&Board> {
        self.board.as_ref()
    }

    fn connected(&self) -> Result<&Board> {
        self.board.as_ref().ok_or(Error::NotConnected)
    }

    /// `WJ_Open`: `0` opens the USB port, `n > 0` opens `COMn`.
    ///
    /// An existing connection is closed first.
    pub async fn wj_open(&mut self, num_scom: i32) -> i32 {
        if let Some(previous) = self.board.take() {
            tracing::debug!("closing previous connection before reopening");
            let _ = previous.close().await;
        }
        let result = self.open(num_scom).await;
        code("WJ_Open", result)
    }

    async fn open(&mut self, num_scom: i32) -> Result<()> {
        let port = PortId::from_vendor(num_scom)?;
        let board = self
            .builder
            .clone()
            .port(port)
            .build_with_connector(self.connector.as_ref())
            .await?;
        self.board = Some(board);
        Ok(())
    }

    /// `WJ_Close`.
    pub async fn wj_close(&mut self) -> i32 {
        let result = match self.board.take() {
            Some(board) => board.close().await,
            None => Err(Error::NotConnected),
        };
        code("WJ_Close", result)
    }

    // ---------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------

    async fn get_field(&self, axis: i32, field: AxisField, value: &mut i32) -> i32 {
        let result = match (self.connected(), axis_index(axis)) {
            (Ok(board), Ok(axis)) => board.get_param(axis, field).await,
            (Err(e), _) | (_, Err(e)) => Err(e),
        };
        output(field_entry_point(field), result, value)
    }

    pub async fn wj_get_axis_acc(&self, axis: i32, value: &mut i32) -> i32 {
        self.get_field(axis, AxisField::Acceleration, value).await
    }

    pub async fn wj_get_axis_dec(&self, axis: i32, value: &mut i32) -> i32 {
        self.get_field(axis, AxisField::Deceleration, value).await
    }

    pub async fn wj_get_axis_vel(&self, axis: i32, value: &mut i32) -> i32 {
        self.get_field(axis, AxisField::Velocity, value).await
    }

    pub async fn wj_get_axis_subdivision(&self, axis: i32, value: &mut i32) -> i32 {
        self.get_field(axis, AxisField::Subdivision, value).await
    }

    /// `WJ_Get_Axis_Status`: the raw status bitfield.
    pub async fn wj_get_axis_status(&self, axis: i32, value: &mut i32) -> i32 {
        self.get_field(axis, AxisField::Status, value).await
    }

    pub async fn wj_get_axis_pulses(&self, axis: i32, value: &mut i32) -> i32 {
        self.get_field(axis, AxisField::Pulses, value).await
    }

    /// `WJ_Get_Axes_Status`: fills the first `axis_count` slots of
    /// `values`, which must be at least that long.
    pub async fn wj_get_axes_status(&self, values: &mut [i32]) -> i32 {
        let result = async {
            let board = self.connected()?;
            check_out_len(board, values.len())?;
            let status = board.get_axes_status().await?;
            Ok::<_, Error>(status.iter().map(|s| s.raw()).collect::<Vec<_>>())
        }
        .await;
        fill("WJ_Get_Axes_Status", result, values)
    }

    /// `WJ_Get_Axes_Pulses`: fills the first `axis_count` slots of
    /// `values`, which must be at least that long.
    pub async fn wj_get_axes_pulses(&self, values: &mut [i32]) -> i32 {
        let result = async {
            let board = self.connected()?;
            check_out_len(board, values.len())?;
            board.get_axes_pulses().await
        }
        .await;
        fill("WJ_Get_Axes_Pulses", result, values)
    }

    /// `WJ_Get_Axes_Num`: 4 or 8.
    pub async fn wj_get_axes_num(&self, value: &mut i32) -> i32 {
        let result = async {
            let board = self.connected()?;
            board.get_axes_num().await.map(i32::from)
        }
        .await;
        output("WJ_Get_Axes_Num", result, value)
    }

    // ---------------------------------------------------------------
    // Motion
    // ---------------------------------------------------------------

    pub async fn wj_move_axis_pulses(&self, axis: i32, value: i32) -> i32 {
        let result = async {
            let (board, axis) = self.axis(axis)?;
            board.move_axis_pulses(axis, value).await
        }
        .await;
        code("WJ_Move_Axis_Pulses", result)
    }

    /// `WJ_Move_Axes_Pulses`: one entry per axis.
    pub async fn wj_move_axes_pulses(&self, values: &[i32]) -> i32 {
        let result = async { self.connected()?.move_axes_pulses(values).await }.await;
        code("WJ_Move_Axes_Pulses", result)
    }

    pub async fn wj_move_axis_vel(&self, axis: i32, value: i32) -> i32 {
        let result = async {
            let (board, axis) = self.axis(axis)?;
            board.move_axis_vel(axis, value).await
        }
        .await;
        code("WJ_Move_Axis_Vel", result)
    }

    /// `WJ_Move_Axes_Vel`: one entry per axis.
    pub async fn wj_move_axes_vel(&self, values: &[i32]) -> i32 {
        let result = async { self.connected()?.move_axes_vel(values).await }.await;
        code("WJ_Move_Axes_Vel", result)
    }

    pub async fn wj_move_axis_emergency_stop(&self, axis: i32) -> i32 {
        let result = async {
            let (board, axis) = self.axis(axis)?;
            board.emergency_stop(axis).await
        }
        .await;
        code("WJ_Move_Axis_Emergency_Stop", result)
    }

    pub async fn wj_move_axis_slow_stop(&self, axis: i32) -> i32 {
        let result = async {
            let (board, axis) = self.axis(axis)?;
            board.slow_stop(axis).await
        }
        .await;
        code("WJ_Move_Axis_Slow_Stop", result)
    }

    pub async fn wj_move_axis_home(&self, axis: i32, value: i32) -> i32 {
        let result = async {
            let (board, axis) = self.axis(axis)?;
            board.home(axis, value).await
        }
        .await;
        code("WJ_Move_Axis_Home", result)
    }

    // ---------------------------------------------------------------
    // Settings
    // ---------------------------------------------------------------

    async fn set_field(&self, axis: i32, field: AxisField, value: i32) -> i32 {
        let result = async {
            let (board, axis) = self.axis(axis)?;
            board.set_param(axis, field, value).await
        }
        .await;
        code(field_entry_point(field), result)
    }

    pub async fn wj_set_axis_acc(&self, axis: i32, value: i32) -> i32 {
        self.set_field(axis, AxisField::Acceleration, value).await
    }

    pub async fn wj_set_axis_dec(&self, axis: i32, value: i32) -> i32 {
        self.set_field(axis, AxisField::Deceleration, value).await
    }

    pub async fn wj_set_axis_vel(&self, axis: i32, value: i32) -> i32 {
        self.set_field(axis, AxisField::Velocity, value).await
    }

    pub async fn wj_set_axis_subdivision(&self, axis: i32, value: i32) -> i32 {
        self.set_field(axis, AxisField::Subdivision, value).await
    }

    pub async fn wj_set_axis_slow_stop(&self, axis: i32, value: i32) -> i32 {
        self.set_field(axis, AxisField::SlowStopDeceleration, value)
            .await
    }

    pub async fn wj_set_move_axis_vel_acc(&self, axis: i32, value: i32) -> i32 {
        self.set_field(axis, AxisField::VelocityAcceleration, value)
            .await
    }

    pub async fn wj_set_axis_home_pulses(&self, axis: i32, value: i32) -> i32 {
        self.set_field(axis, AxisField::HomePulses, value).await
    }

    pub async fn wj_set_axis_pulses_zero(&self, axis: i32) -> i32 {
        let result = async {
            let (board, axis) = self.axis(axis)?;
            board.set_axis_pulses_zero(axis).await
        }
        .await;
        code("WJ_Set_Axis_Pulses_Zero", result)
    }

    pub async fn wj_set_led_twinkle(&self) -> i32 {
        let result = async { self.connected()?.led_twinkle().await }.await;
        code("WJ_Set_Led_Twinkle", result)
    }

    /// `WJ_Set_Default`: restore factory defaults.
    pub async fn wj_set_default(&self) -> i32 {
        let result = async { self.connected()?.restore_defaults().await }.await;
        code("WJ_Set_Default", result)
    }

    // ---------------------------------------------------------------
    // Digital I/O
    // ---------------------------------------------------------------

    /// `WJ_IO_Output`: any non-zero `value` drives the line high.
    pub async fn wj_io_output(&self, line: i32, value: i32) -> i32 {
        let result = async {
            let board = self.connected()?;
            board.io_output(line_index(line)?, value != 0).await
        }
        .await;
        code("WJ_IO_Output", result)
    }

    /// `WJ_IO_Input`: writes `1` for high, `0` for low.
    pub async fn wj_io_input(&self, line: i32, value: &mut i32) -> i32 {
        let result = async {
            let board = self.connected()?;
            board.io_input(line_index(line)?).await.map(i32::from)
        }
        .await;
        output("WJ_IO_Input", result, value)
    }

    /// Connection check first, then the integer-to-axis conversion.
    fn axis(&self, axis: i32) -> Result<(&Board, u8)> {
        let board = self.connected()?;
        Ok((board, axis_index(axis)?))
    }
}

impl std::fmt::Debug for WjApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WjApi").field("board", &self.board).finish()
    }
}

fn axis_index(axis: i32) -> Result<u8> {
    u8::try_from(axis).map_err(|_| Error::Validation(format!("axis {axis} out of range")))
}

fn line_index(line: i32) -> Result<u8> {
    u8::try_from(line).map_err(|_| Error::Validation(format!("I/O line {line} out of range")))
}

fn check_out_len(board: &Board, len: usize) -> Result<()> {
    let needed = board.axis_count() as usize;
    if len < needed {
        return Err(Error::Validation(format!(
            "output buffer holds {len} values, board has {needed} axes"
        )));
    }
    Ok(())
}

fn field_entry_point(field: AxisField) -> &'static str {
    match field {
        AxisField::Acceleration => "WJ_Axis_Acc",
        AxisField::Deceleration => "WJ_Axis_Dec",
        AxisField::Velocity => "WJ_Axis_Vel",
        AxisField::Subdivision => "WJ_Axis_Subdivision",
        AxisField::Pulses => "WJ_Get_Axis_Pulses",
        AxisField::Status => "WJ_Get_Axis_Status",
        AxisField::SlowStopDeceleration => "WJ_Set_Axis_Slow_Stop",
        AxisField::VelocityAcceleration => "WJ_Set_Move_Axis_Vel_Acc",
        AxisField::HomePulses => "WJ_Set_Axis_Home_Pulses",
    }
}

fn code(entry: &'static str, result: Result<()>) -> i32 {
    if let Err(e) = &result {
        tracing::debug!(entry, error = %e, "call failed");
    }
    status::status_code(&result)
}

fn output(entry: &'static str, result: Result<i32>, slot: &mut i32) -> i32 {
    match result {
        Ok(v) => {
            *slot = v;
            status::OK
        }
        Err(e) => {
            tracing::debug!(entry, error = %e, "call failed");
            e.status_code()
        }
    }
}

fn fill(entry: &'static str, result: Result<Vec<i32>>, slots: &mut [i32]) -> i32 {
    match result {
        Ok(values) => {
            for (slot, v) in slots.iter_mut().zip(values) {
                *slot = v;
            }
            status::OK
        }
        Err(e) => {
            tracing::debug!(entry, error = %e, "call failed");
            e.status_code()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wjmotion_test_harness::SimHandle;

    fn api(handle: &SimHandle) -> WjApi {
        WjApi::with_connector(
            handle.connector(),
            BoardBuilder::new()
                .command_timeout(Duration::from_millis(20))
                .max_retries(0),
        )
    }

    #[tokio::test]
    async fn calls_before_open_are_not_connected() {
        let handle = SimHandle::new(4, 8);
        let api = api(&handle);
        let mut v = 77;
        assert_eq!(api.wj_get_axis_acc(1, &mut v).await, status::NOT_CONNECTED);
        assert_eq!(v, 77);
        assert_eq!(api.wj_move_axis_pulses(1, 5).await, status::NOT_CONNECTED);
        assert_eq!(api.wj_set_led_twinkle().await, status::NOT_CONNECTED);
        assert!(handle.opened_ports().is_empty());
    }

    #[tokio::test]
    async fn open_maps_vendor_port_numbers() {
        let handle = SimHandle::new(4, 8);
        let mut api = api(&handle);
        assert_eq!(api.wj_open(0).await, status::OK);
        assert_eq!(api.wj_open(3).await, status::OK);
        assert_eq!(api.wj_open(-1).await, status::VALIDATION);
        assert_eq!(
            handle.opened_ports(),
            vec![PortId::Usb, PortId::Serial(3)]
        );
        assert!(api.board().is_none());
    }

    #[tokio::test]
    async fn close_twice_reports_not_connected() {
        let handle = SimHandle::new(4, 8);
        let mut api = api(&handle);
        assert_eq!(api.wj_open(0).await, status::OK);
        assert_eq!(api.wj_close().await, status::OK);
        assert_eq!(api.wj_close().await, status::NOT_CONNECTED);
    }

    #[tokio::test]
    async fn negative_and_out_of_range_axes_are_validation() {
        let handle = SimHandle::new(4, 8);
        let mut api = api(&handle);
        api.wj_open(0).await;
        let sent = handle.received_opcodes().len();
        let mut v = 0;
        assert_eq!(api.wj_get_axis_vel(-1, &mut v).await, status::VALIDATION);
        assert_eq!(api.wj_get_axis_vel(0, &mut v).await, status::VALIDATION);
        assert_eq!(api.wj_get_axis_vel(5, &mut v).await, status::VALIDATION);
        assert_eq!(api.wj_get_axis_vel(300, &mut v).await, status::VALIDATION);
        assert_eq!(api.wj_set_axis_vel(9, 1).await, status::VALIDATION);
        assert_eq!(api.wj_io_output(-2, 1).await, status::VALIDATION);
        assert_eq!(api.wj_io_input(9, &mut v).await, status::VALIDATION);
        assert_eq!(handle.received_opcodes().len(), sent);
    }

    #[tokio::test]
    async fn axes_buffers_sized_to_axis_count() {
        let handle = SimHandle::new(4, 8);
        handle.update_axis(2, |a| a.pulses = -40);
        let mut api = api(&handle);
        api.wj_open(0).await;

        let mut short = [0i32; 3];
        assert_eq!(api.wj_get_axes_pulses(&mut short).await, status::VALIDATION);

        let mut pulses = [9i32; 8];
        assert_eq!(api.wj_get_axes_pulses(&mut pulses).await, status::OK);
        assert_eq!(pulses, [0, -40, 0, 0, 9, 9, 9, 9]);

        let mut statuses = [0i32; 4];
        assert_eq!(api.wj_get_axes_status(&mut statuses).await, status::OK);

        assert_eq!(api.wj_move_axes_pulses(&[1, 2, 3]).await, status::VALIDATION);
        assert_eq!(api.wj_move_axes_pulses(&[1, 2, 3, 4]).await, status::OK);
        assert_eq!(api.wj_move_axes_vel(&[0, 0, 0, 0]).await, status::OK);
    }

    #[tokio::test]
    async fn timeout_and_protocol_codes() {
        let handle = SimHandle::new(4, 8);
        let mut api = api(&handle);
        api.wj_open(0).await;
        let mut v = 5;

        handle.drop_next_replies(1);
        assert_eq!(api.wj_get_axis_acc(1, &mut v).await, status::TIMEOUT);
        assert_eq!(v, 5);

        handle.reject_next(1);
        assert_eq!(api.wj_set_axis_acc(1, 10).await, status::PROTOCOL);

        assert_eq!(api.wj_get_axis_acc(1, &mut v).await, status::OK);
        assert_eq!(v, 1000);
    }

    #[tokio::test]
    async fn transport_failure_then_not_connected() {
        let handle = SimHandle::new(4, 8);
        let mut api = api(&handle);
        api.wj_open(0).await;
        handle.fail_next_send();
        assert_eq!(api.wj_set_axis_vel(1, 10).await, status::TRANSPORT);
        assert_eq!(api.wj_set_axis_vel(1, 10).await, status::NOT_CONNECTED);
        assert_eq!(api.wj_open(0).await, status::OK);
        assert_eq!(api.wj_set_axis_vel(1, 10).await, status::OK);
    }

    #[tokio::test]
    async fn io_lines() {
        let handle = SimHandle::new(8, 8);
        handle.set_input(1, true);
        let mut api = api(&handle);
        api.wj_open(0).await;
        let mut level = -1;
        assert_eq!(api.wj_io_input(1, &mut level).await, status::OK);
        assert_eq!(level, 1);
        assert_eq!(api.wj_io_input(2, &mut level).await, status::OK);
        assert_eq!(level, 0);
        assert_eq!(api.wj_io_output(8, 7).await, status::OK);
        assert!(handle.output(8));
        assert_eq!(api.wj_io_output(8, 0).await, status::OK);
        assert!(!handle.output(8));
    }
}
