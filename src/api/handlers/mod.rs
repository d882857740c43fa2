pub mod actuators;
pub mod alerts;
pub mod auth;
pub mod sensors;
pub mod system;
pub mod users;

use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::{
    api::dto::{Ack, Count, LoginResponse, UserDto},
    backup::BackupInfo,
    db::models::{
        Actuator, ActuatorLog, ActuatorMode, ActuatorType, Alert, AlertPreferences,
        AlertThreshold, AutoRule, Condition, LogSource, Reading, ReadingRecord, Role, Sensor,
        SensorStatus, SensorType, Severity,
    },
    farm::{
        actuators::{ControlRecord, DeviceState},
        dashboard::DashboardSummary,
        input::{
            ActuatorUpdate, AdminUserUpdate, ControlCommand, LoginInput, NewActuator, NewReading,
            NewSensor, NewThreshold, PasswordChange, ProfileUpdate, RegisterInput, SensorUpdate,
            ThresholdUpdate,
        },
        readings::SensorStats,
    },
    realtime::merge::LiveSnapshot,
};

/// Registers the `bearer` scheme every protected path refers to.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::register,
        auth::login,
        auth::logout,
        auth::profile,
        auth::update_profile,
        auth::change_password,
        users::list_users,
        users::get_user,
        users::update_user,
        users::delete_user,
        sensors::list_sensors,
        sensors::get_sensor,
        sensors::create_sensor,
        sensors::update_sensor,
        sensors::delete_sensor,
        sensors::list_readings,
        sensors::add_reading,
        sensors::sensor_stats,
        actuators::list_actuators,
        actuators::get_actuator,
        actuators::create_actuator,
        actuators::update_actuator,
        actuators::delete_actuator,
        actuators::control_actuator,
        actuators::update_auto_rules,
        actuators::merge_parameters,
        actuators::actuator_logs,
        alerts::list_alerts,
        alerts::unread_count,
        alerts::mark_read,
        alerts::mark_all_read,
        alerts::acknowledge,
        alerts::delete_alert,
        alerts::list_thresholds,
        alerts::create_threshold,
        alerts::update_threshold,
        alerts::delete_threshold,
        alerts::get_preferences,
        alerts::update_preferences,
        system::health,
        system::dashboard,
        system::live_state,
        system::events,
        system::list_backups,
        system::create_backup,
        system::restore_backup,
    ),
    components(schemas(
        Ack, Count, LoginResponse, UserDto, Role,
        Sensor, SensorType, SensorStatus, Reading, ReadingRecord, SensorStats,
        Actuator, ActuatorType, ActuatorMode, AutoRule, Condition, ActuatorLog, LogSource,
        ControlRecord, DeviceState,
        Alert, Severity, AlertThreshold, AlertPreferences,
        DashboardSummary, LiveSnapshot, BackupInfo,
        RegisterInput, LoginInput, ProfileUpdate, PasswordChange, AdminUserUpdate,
        NewSensor, SensorUpdate, NewReading, NewActuator, ActuatorUpdate, ControlCommand,
        NewThreshold, ThresholdUpdate,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Registration, sign-in and the caller's own account"),
        (name = "users", description = "User administration"),
        (name = "sensors", description = "Sensors and their readings"),
        (name = "actuators", description = "Actuators, commands and automation rules"),
        (name = "alerts", description = "Alerts, thresholds and notification preferences"),
        (name = "system", description = "Health, dashboard, live state, event feed and backups"),
    ),
    info(
        title = "Smart Farm Service API",
        version = "0.1.0",
        description = "REST API for greenhouse sensors, actuators and alerts"
    )
)]
pub struct ApiDoc;
