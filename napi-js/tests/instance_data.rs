use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use napi_js::AsyncWorkScheduler;
use napi_js::Environment;
use napi_js::NapiResult;
use napi_js::SchedulerOptions;
use napi_js::Status;

fn env() -> Environment {
  let scheduler = AsyncWorkScheduler::new(SchedulerOptions {
    worker_threads: 1,
    ..SchedulerOptions::default()
  })
  .unwrap();
  Environment::new(scheduler)
}

type Log = Rc<RefCell<Vec<String>>>;

fn logging_finalizer(log: &Log) -> napi_js::FinalizeCallback<String> {
  let log = Rc::clone(log);
  Box::new(move |env: &mut Environment, data: String, hint: Option<Box<dyn Any>>| {
    let hint = hint
      .and_then(|hint| hint.downcast::<u32>().ok())
      .map(|hint| *hint);
    // The slot is already empty while the finalizer runs.
    let visible = env.get_instance_data::<String>().unwrap().cloned();
    log
      .borrow_mut()
      .push(format!("finalize {data} hint={hint:?} visible={visible:?}"));
  })
}

#[test]
fn replacing_finalizes_the_previous_occupant_first() -> NapiResult<()> {
  let log: Log = Rc::default();
  let mut env = env();

  env.set_instance_data(
    "first".to_string(),
    Some(logging_finalizer(&log)),
    Some(Box::new(1u32)),
  )?;
  assert_eq!(env.get_instance_data::<String>()?.map(String::as_str), Some("first"));
  assert!(log.borrow().is_empty());

  env.set_instance_data("second".to_string(), Some(logging_finalizer(&log)), None)?;
  assert_eq!(
    *log.borrow(),
    vec!["finalize first hint=Some(1) visible=None".to_string()]
  );
  assert_eq!(env.get_instance_data::<String>()?.map(String::as_str), Some("second"));
  assert_eq!(env.last_status(), Status::Ok);

  drop(env);
  assert_eq!(
    *log.borrow(),
    vec![
      "finalize first hint=Some(1) visible=None".to_string(),
      "finalize second hint=None visible=None".to_string(),
    ]
  );
  Ok(())
}

#[test]
fn get_never_finalizes_and_checks_the_type() -> NapiResult<()> {
  let log: Log = Rc::default();
  let mut env = env();
  assert_eq!(env.get_instance_data::<String>()?, None);

  env.set_instance_data("data".to_string(), Some(logging_finalizer(&log)), None)?;
  for _ in 0..3 {
    assert!(env.get_instance_data::<String>()?.is_some());
  }
  assert_eq!(env.get_instance_data::<u64>()?, None);
  assert!(log.borrow().is_empty());
  Ok(())
}

#[test]
fn data_can_be_mutated_in_place() -> NapiResult<()> {
  let mut env = env();
  env.set_instance_data(41u32, None, None)?;
  if let Some(value) = env.instance_data_mut::<u32>()? {
    *value += 1;
  }
  assert_eq!(env.get_instance_data::<u32>()?.copied(), Some(42));
  Ok(())
}

#[test]
fn teardown_finalizes_exactly_once() -> NapiResult<()> {
  let calls = Rc::new(RefCell::new(0));
  let mut env = env();
  let counter = Rc::clone(&calls);
  env.set_instance_data(
    5u8,
    Some(Box::new(move |_env: &mut Environment, data: u8, _hint: Option<Box<dyn Any>>| {
      assert_eq!(data, 5);
      *counter.borrow_mut() += 1;
    })),
    None,
  )?;

  env.teardown();
  assert_eq!(*calls.borrow(), 1);
  Ok(())
}

#[test]
fn data_installed_by_a_finalizer_is_finalized_too() -> NapiResult<()> {
  let log: Log = Rc::default();
  let mut env = env();

  let inner_log = Rc::clone(&log);
  let reinstall_log = Rc::clone(&log);
  env.set_instance_data(
    "outer".to_string(),
    Some(Box::new(move |env: &mut Environment, data: String, _hint: Option<Box<dyn Any>>| {
      reinstall_log.borrow_mut().push(format!("finalize {data}"));
      let nested_log = Rc::clone(&inner_log);
      env
        .set_instance_data(
          "nested".to_string(),
          Some(Box::new(move |_env: &mut Environment, data: String, _hint: Option<Box<dyn Any>>| {
            nested_log.borrow_mut().push(format!("finalize {data}"));
          })),
          None,
        )
        .unwrap();
    })),
    None,
  )?;

  env.set_instance_data("final".to_string(), None, None)?;
  assert_eq!(
    *log.borrow(),
    vec!["finalize outer".to_string(), "finalize nested".to_string()]
  );
  assert_eq!(env.get_instance_data::<String>()?.map(String::as_str), Some("final"));
  Ok(())
}
